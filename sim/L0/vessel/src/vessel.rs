//! The vessel interface and the upstream force driver.
//!
//! A vessel stores some per-entity quantity for one step and collects the
//! forces downstream consumers want to apply through it. The object-safe
//! [`Vessel`] part is all the force driver needs; [`StoringVessel`] adds the
//! provider-typed evaluation side.

use tracing::trace;

use crate::error::VesselError;
use crate::provider::EntityTopology;

/// Per-step force interface shared by every vessel.
pub trait Vessel {
    /// Diagnostic label.
    fn label(&self) -> &str;

    /// Clear forces and evaluation state at the start of a step.
    fn prepare(&mut self);

    /// Number of global DOF the force vectors cover.
    fn num_forces(&self) -> usize;

    /// Add a full-length force vector. Multiple calls in one step are summed.
    fn add_forces(&mut self, forces: &[f64]);

    /// Copy the step's accumulated forces into `out`.
    ///
    /// Returns false and leaves `out` untouched if nothing was added since
    /// the last [`prepare`](Self::prepare).
    fn apply_force(&mut self, out: &mut [f64]) -> bool;
}

/// Evaluation side of a vessel, typed on the provider it reads from.
pub trait StoringVessel<P: EntityTopology + ?Sized>: Vessel {
    /// What [`value`](Self::value) returns for one entity.
    type Output;

    /// Rebuild storage for the provider's current topology.
    fn resize(&mut self, provider: &P);

    /// Evaluate and store one entity.
    fn calculate(&mut self, provider: &P, entity: usize);

    /// Stored value of one entity.
    fn value(&self, entity: usize) -> Self::Output;

    /// Evaluate and store every entity.
    fn calculate_all(&mut self, provider: &P) {
        for entity in 0..provider.entity_count() {
            self.calculate(provider, entity);
        }
    }
}

/// Gather the step's forces from every vessel into `global`.
///
/// Each vessel that was forced writes its forces into `scratch`, which is
/// then added into `global`. Returns true if at least one vessel
/// contributed.
///
/// # Panics
///
/// Panics if `scratch`, `global` and the vessels disagree on the number of
/// DOF.
#[track_caller]
pub fn apply_vessel_forces(
    vessels: &mut [&mut dyn Vessel],
    scratch: &mut [f64],
    global: &mut [f64],
) -> bool {
    if scratch.len() != global.len() {
        VesselError::length_mismatch(global.len(), scratch.len()).violated();
    }

    let mut forced = false;
    for vessel in vessels.iter_mut() {
        if vessel.num_forces() != global.len() {
            VesselError::length_mismatch(global.len(), vessel.num_forces()).violated();
        }
        if vessel.apply_force(scratch) {
            trace!(label = vessel.label(), "vessel contributed forces");
            for (g, f) in global.iter_mut().zip(scratch.iter()) {
                *g += *f;
            }
            forced = true;
        }
    }
    forced
}
