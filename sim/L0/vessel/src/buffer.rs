//! Contiguous storage for values and their derivatives.

use std::ops::Range;

use crate::error::VesselError;

/// A single flat `f64` array holding every entity's value block.
///
/// The buffer is sized once per topology change and reused across steps.
/// Offsets come from an [`OffsetTable`](crate::OffsetTable); reading or
/// writing outside the buffer is a contract violation and panics.
///
/// # Example
///
/// ```
/// use sim_vessel::FlatDerivativeBuffer;
///
/// let mut buffer = FlatDerivativeBuffer::with_len(4);
/// buffer.write_at(1, 2.5);
/// buffer.accumulate_at(1, 0.5);
/// assert_eq!(buffer.read_at(1), 3.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatDerivativeBuffer {
    data: Vec<f64>,
}

impl FlatDerivativeBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a zero-filled buffer of length `len`.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    /// Resize to `len` slots and zero every slot.
    pub fn resize(&mut self, len: usize) {
        self.data.clear();
        self.data.resize(len, 0.0);
    }

    /// Zero every slot without changing the length.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the buffer has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrite the slot at `offset`.
    #[inline]
    #[track_caller]
    pub fn write_at(&mut self, offset: usize, value: f64) {
        *self.slot_mut(offset) = value;
    }

    /// Add `value` into the slot at `offset`.
    #[inline]
    #[track_caller]
    pub fn accumulate_at(&mut self, offset: usize, value: f64) {
        *self.slot_mut(offset) += value;
    }

    /// Read the slot at `offset`.
    #[must_use]
    #[inline]
    #[track_caller]
    pub fn read_at(&self, offset: usize) -> f64 {
        match self.data.get(offset) {
            Some(v) => *v,
            None => VesselError::offset_out_of_range(offset, self.data.len()).violated(),
        }
    }

    /// Borrow a range of slots.
    #[must_use]
    #[track_caller]
    pub fn block(&self, range: Range<usize>) -> &[f64] {
        self.check_range(&range);
        &self.data[range]
    }

    /// Mutably borrow a range of slots.
    #[track_caller]
    pub fn block_mut(&mut self, range: Range<usize>) -> &mut [f64] {
        self.check_range(&range);
        &mut self.data[range]
    }

    /// The whole buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// The whole buffer, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    #[track_caller]
    fn slot_mut(&mut self, offset: usize) -> &mut f64 {
        let len = self.data.len();
        match self.data.get_mut(offset) {
            Some(v) => v,
            None => VesselError::offset_out_of_range(offset, len).violated(),
        }
    }

    #[track_caller]
    fn check_range(&self, range: &Range<usize>) {
        if range.start > range.end || range.end > self.data.len() {
            VesselError::offset_out_of_range(range.end, self.data.len()).violated();
        }
    }
}
