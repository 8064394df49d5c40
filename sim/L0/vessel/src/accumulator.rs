//! Dense per-step force accumulation over the global DOF space.

use nalgebra::DVector;
use tracing::trace;

use crate::error::VesselError;
use crate::sink::{DerivativeSink, add_checked};

/// Collects force contributions from downstream consumers for one step.
///
/// Lifecycle per step:
///
/// 1. [`clear`](Self::clear) zeroes the forces and resets the forced flag.
/// 2. Any number of [`add_forces`](Self::add_forces) calls (or direct chain
///    rule writes through [`DerivativeSink`]) sum into the array.
/// 3. One [`apply_force`](Self::apply_force) hands the sum to the driver if
///    anything was added.
///
/// Contributions are summed, never replaced: two consumers forcing the same
/// DOF in one step both count.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceAccumulator {
    forces: DVector<f64>,
    was_forced: bool,
}

impl Default for ForceAccumulator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ForceAccumulator {
    /// Create a zeroed accumulator over `len` DOF.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            forces: DVector::zeros(len),
            was_forced: false,
        }
    }

    /// Change the number of DOF. Contents are zeroed.
    pub fn resize(&mut self, len: usize) {
        if self.forces.len() == len {
            self.forces.fill(0.0);
        } else {
            self.forces = DVector::zeros(len);
        }
        self.was_forced = false;
    }

    /// Zero all forces and reset the forced flag.
    pub fn clear(&mut self) {
        self.forces.fill(0.0);
        self.was_forced = false;
    }

    /// Number of DOF.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forces.len()
    }

    /// True if the accumulator covers no DOF.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forces.is_empty()
    }

    /// Whether any contribution arrived since the last clear.
    #[must_use]
    pub const fn was_forced(&self) -> bool {
        self.was_forced
    }

    /// Mark the accumulator as forced without adding anything.
    ///
    /// Chain-rule writes go through [`DerivativeSink`], which does not touch
    /// the flag; bulk projections call this once they are done.
    pub fn mark_forced(&mut self) {
        self.was_forced = true;
    }

    /// Accumulated forces.
    #[must_use]
    pub fn forces(&self) -> &DVector<f64> {
        &self.forces
    }

    /// Add a full-length force vector element-wise.
    ///
    /// # Panics
    ///
    /// Panics if `forces` does not cover exactly [`len`](Self::len) DOF.
    #[track_caller]
    pub fn add_forces(&mut self, forces: &[f64]) {
        if forces.len() != self.forces.len() {
            VesselError::length_mismatch(self.forces.len(), forces.len()).violated();
        }
        self.was_forced = true;
        for (acc, f) in self.forces.iter_mut().zip(forces) {
            *acc += *f;
        }
    }

    /// Add another accumulator of the same length (reduction step).
    ///
    /// # Panics
    ///
    /// Panics on a length mismatch.
    #[track_caller]
    pub fn merge(&mut self, other: &Self) {
        if other.len() != self.len() {
            VesselError::length_mismatch(self.len(), other.len()).violated();
        }
        self.forces += &other.forces;
        self.was_forced |= other.was_forced;
    }

    /// Copy the accumulated forces into `out` if anything was added.
    ///
    /// Returns `false` and leaves `out` untouched when the accumulator was
    /// never forced since the last clear.
    ///
    /// # Panics
    ///
    /// Panics if `out` does not cover exactly [`len`](Self::len) DOF.
    #[track_caller]
    pub fn apply_force(&self, out: &mut [f64]) -> bool {
        if out.len() != self.forces.len() {
            VesselError::length_mismatch(self.forces.len(), out.len()).violated();
        }
        if self.was_forced {
            out.copy_from_slice(self.forces.as_slice());
            trace!(ndof = out.len(), "applied accumulated forces");
        }
        self.was_forced
    }
}

impl DerivativeSink for ForceAccumulator {
    #[inline]
    #[track_caller]
    fn add_element_derivative(&mut self, index: usize, value: f64) {
        add_checked(self.forces.as_mut_slice(), index, value);
    }
}
