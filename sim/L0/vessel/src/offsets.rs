//! Per-entity offsets into the flat derivative buffer.
//!
//! Entities own a ragged number of degrees of freedom, so their blocks in the
//! flat buffer have different lengths. The table stores a running sum of the
//! block lengths, in the same `adr`/`num` spirit as the tendon and actuator
//! address arrays of the model:
//!
//! ```text
//!  start[0]=0        start[1]              start[2]      start[N]
//!  │ v0 d0 d1 │ v1 d0 d1 │ v2 d0 d1 │ v0 d0 │ v1 d0 │ v2 d0 │
//!  └──────── entity 0 (2 DOF) ───────┴──── entity 1 (1 DOF) ──┘
//! ```
//!
//! Within a block, component `c` starts at `start[i] + c * (n_i + 1)`: one
//! value slot followed by `n_i` derivative slots.

use std::ops::Range;

/// Number of value components stored for a position-like quantity.
pub const VECTOR_COMPONENTS: usize = 3;

/// Running-sum offsets for a ragged set of entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    /// Value components per entity (3 for positions, 1 for scalars).
    components: usize,
    /// `start[i]` is the first buffer slot of entity `i`; `start[N]` is the total length.
    start: Vec<usize>,
    /// Running sum of raw derivative counts, used to index the DOF map arena.
    dof_start: Vec<usize>,
}

impl Default for OffsetTable {
    fn default() -> Self {
        Self::new(VECTOR_COMPONENTS)
    }
}

impl OffsetTable {
    /// Create an empty table for entities with `components` value components.
    #[must_use]
    pub fn new(components: usize) -> Self {
        debug_assert!(components > 0, "an entity needs at least one component");
        Self {
            components,
            start: vec![0],
            dof_start: vec![0],
        }
    }

    /// Rebuild the offsets from per-entity derivative counts.
    ///
    /// Entity `i` contributes `components * (1 + counts[i])` slots. Calling
    /// this again with the same counts reproduces the same table, and reuses
    /// the existing allocation.
    pub fn resize(&mut self, counts: &[usize]) {
        self.resize_from(counts.iter().copied());
    }

    /// Rebuild the offsets from an iterator of derivative counts.
    pub fn resize_from(&mut self, counts: impl IntoIterator<Item = usize>) {
        self.start.clear();
        self.dof_start.clear();

        let mut bsize = 0;
        let mut nder = 0;
        for count in counts {
            self.start.push(bsize);
            self.dof_start.push(nder);
            bsize += self.components * (1 + count);
            nder += count;
        }
        self.start.push(bsize);
        self.dof_start.push(nder);
    }

    /// Value components per entity.
    #[must_use]
    pub const fn components(&self) -> usize {
        self.components
    }

    /// Number of entities covered by the table.
    #[must_use]
    pub fn num_entities(&self) -> usize {
        self.start.len() - 1
    }

    /// True if the table covers no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_entities() == 0
    }

    /// Total flat buffer length (`start[N]`).
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.start[self.start.len() - 1]
    }

    /// Sum of all per-entity derivative counts.
    #[must_use]
    pub fn total_derivatives(&self) -> usize {
        self.dof_start[self.dof_start.len() - 1]
    }

    /// First buffer slot of entity `i`. `start(N)` is the total length.
    #[must_use]
    #[inline]
    pub fn start(&self, i: usize) -> usize {
        self.start[i]
    }

    /// One past the last buffer slot of entity `i`.
    #[must_use]
    #[inline]
    pub fn end(&self, i: usize) -> usize {
        self.start[i + 1]
    }

    /// Buffer slots owned by entity `i`.
    #[must_use]
    #[inline]
    pub fn block(&self, i: usize) -> Range<usize> {
        self.start[i]..self.start[i + 1]
    }

    /// Number of local degrees of freedom of entity `i`.
    #[must_use]
    #[inline]
    pub fn derivative_count(&self, i: usize) -> usize {
        self.dof_start[i + 1] - self.dof_start[i]
    }

    /// Distance between consecutive component sub-blocks of entity `i`.
    #[must_use]
    #[inline]
    pub fn stride(&self, i: usize) -> usize {
        self.derivative_count(i) + 1
    }

    /// Buffer slot holding the value of component `c` of entity `i`.
    ///
    /// The derivatives of that component follow in the next
    /// `derivative_count(i)` slots.
    #[must_use]
    #[inline]
    pub fn component_offset(&self, i: usize, c: usize) -> usize {
        debug_assert!(c < self.components);
        self.start[i] + c * self.stride(i)
    }

    /// Slots of the DOF map arena owned by entity `i`.
    #[must_use]
    #[inline]
    pub fn dof_block(&self, i: usize) -> Range<usize> {
        self.dof_start[i]..self.dof_start[i + 1]
    }

    /// Start of entity `i` in the DOF map arena.
    #[must_use]
    #[inline]
    pub fn dof_start(&self, i: usize) -> usize {
        self.dof_start[i]
    }

    /// Iterate over the derivative counts the table was built from.
    pub fn derivative_counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.dof_start.windows(2).map(|w| w[1] - w[0])
    }

    /// The raw `start[0..=N]` table.
    #[must_use]
    pub fn starts(&self) -> &[usize] {
        &self.start
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table() {
        let mut table = OffsetTable::default();
        table.resize(&[]);

        assert!(table.is_empty());
        assert_eq!(table.total_len(), 0);
        assert_eq!(table.total_derivatives(), 0);
        assert_eq!(table.starts(), &[0]);
    }

    #[test]
    fn test_ragged_offsets() {
        let mut table = OffsetTable::default();
        table.resize(&[2, 1]);

        assert_eq!(table.starts(), &[0, 9, 15]);
        assert_eq!(table.block(0), 0..9);
        assert_eq!(table.block(1), 9..15);
        assert_eq!(table.total_derivatives(), 3);
        assert_eq!(table.dof_block(1), 2..3);
    }

    #[test]
    fn test_component_offsets() {
        let mut table = OffsetTable::default();
        table.resize(&[2, 0, 4]);

        // Entity 0: stride 3
        assert_eq!(table.component_offset(0, 0), 0);
        assert_eq!(table.component_offset(0, 1), 3);
        assert_eq!(table.component_offset(0, 2), 6);

        // Entity 1 owns no DOF: three bare values
        assert_eq!(table.block(1), 9..12);
        assert_eq!(table.component_offset(1, 2), 11);

        // Last component sub-block ends exactly at the next entity
        let last = table.component_offset(2, 2) + table.stride(2);
        assert_eq!(last, table.end(2));
        assert_eq!(last, table.total_len());
    }

    #[test]
    fn test_scalar_components() {
        let mut table = OffsetTable::new(1);
        table.resize(&[3, 1]);

        assert_eq!(table.starts(), &[0, 4, 6]);
        assert_eq!(table.derivative_counts().collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn test_resize_shrinks_and_grows() {
        let mut table = OffsetTable::default();
        table.resize(&[5, 5, 5]);
        assert_eq!(table.num_entities(), 3);

        table.resize(&[1]);
        assert_eq!(table.num_entities(), 1);
        assert_eq!(table.total_len(), 6);

        table.resize(&[0, 0, 0, 0]);
        assert_eq!(table.total_len(), 12);
    }
}
