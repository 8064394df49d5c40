//! Central atom position stash.
//!
//! Stores, for every entity, the 3-vector position of its central atom and
//! the derivative of each coordinate with respect to every DOF the entity
//! depends on. Consumers read the positions, decide on a force per central
//! atom, and push it back onto the underlying DOF with
//! [`CentralAtomVessel::chain_rule`]. No re-differentiation happens at that
//! point; the cached forward derivatives are reused.

use nalgebra::Vector3;

use crate::config::VesselConfig;
use crate::offsets::VECTOR_COMPONENTS;
use crate::provider::CentralAtomProvider;
use crate::sink::DerivativeSink;
use crate::stash::{DerivativeStash, StepPhase};
use crate::vessel::{StoringVessel, Vessel};

/// Stash of central atom positions and their derivatives.
///
/// # Example
///
/// ```
/// use nalgebra::Vector3;
/// use sim_vessel::{CentralAtomProvider, CentralAtomVessel, EntityTopology, StoringVessel, Vessel};
///
/// /// One atom whose position is its own three coordinates.
/// struct Atom([f64; 3]);
///
/// impl EntityTopology for Atom {
///     fn entity_count(&self) -> usize { 1 }
///     fn derivative_count(&self, _: usize) -> usize { 3 }
///     fn total_derivative_count(&self) -> usize { 3 }
///     fn global_dof_index(&self, _: usize, local: usize) -> usize { local }
/// }
///
/// impl CentralAtomProvider for Atom {
///     fn value(&self, _: usize) -> Vector3<f64> { Vector3::from(self.0) }
///     fn derivative(&self, _: usize, local: usize, c: usize) -> f64 {
///         if local == c { 1.0 } else { 0.0 }
///     }
/// }
///
/// let atom = Atom([1.0, 2.0, 3.0]);
/// let mut vessel = CentralAtomVessel::new();
/// vessel.resize(&atom);
/// vessel.prepare();
/// vessel.calculate_all(&atom);
///
/// assert_eq!(vessel.position(0), Vector3::new(1.0, 2.0, 3.0));
///
/// let mut generalized = vec![0.0; 3];
/// vessel.chain_rule(0, 0, &Vector3::new(0.0, -1.0, 0.0), &mut generalized);
/// assert_eq!(generalized, vec![0.0, -1.0, 0.0]);
/// ```
#[derive(Debug, Clone)]
pub struct CentralAtomVessel {
    stash: DerivativeStash,
}

impl Default for CentralAtomVessel {
    fn default() -> Self {
        Self::new()
    }
}

impl CentralAtomVessel {
    /// Default diagnostic label.
    pub const LABEL: &'static str = "catom_stash";

    /// Create an unsized vessel with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(VesselConfig::labeled(Self::LABEL))
    }

    /// Create an unsized vessel with the given configuration.
    #[must_use]
    pub fn with_config(config: VesselConfig) -> Self {
        Self {
            stash: DerivativeStash::new(VECTOR_COMPONENTS, config),
        }
    }

    /// The underlying storage.
    #[must_use]
    pub const fn stash(&self) -> &DerivativeStash {
        &self.stash
    }

    /// Current step phase.
    #[must_use]
    pub const fn phase(&self) -> StepPhase {
        self.stash.phase()
    }

    /// Number of entities after the last resize.
    #[must_use]
    pub fn num_entities(&self) -> usize {
        self.stash.num_entities()
    }

    /// Check the provider against the last resize.
    pub fn check_topology<P: CentralAtomProvider + ?Sized>(&self, provider: &P) -> crate::Result<()> {
        self.stash.check_topology(provider)
    }

    /// Resize if the provider's topology changed. Returns true if it did.
    pub fn resize_if_needed<P: CentralAtomProvider + ?Sized>(&mut self, provider: &P) -> bool {
        self.stash.resize_if_needed(provider)
    }

    /// Evaluate every entity on the rayon pool.
    #[cfg(feature = "parallel")]
    pub fn calculate_all_par<P: CentralAtomProvider + Sync + ?Sized>(&mut self, provider: &P) {
        self.stash.store_all_par(
            provider,
            |i| <[f64; 3]>::from(provider.value(i)),
            |i, d, c| provider.derivative(i, d, c),
        );
    }

    /// Stored central atom position of `entity`.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is out of range or was not evaluated this step.
    #[must_use]
    #[track_caller]
    pub fn position(&self, entity: usize) -> Vector3<f64> {
        let mut pos = [0.0; VECTOR_COMPONENTS];
        self.stash.read_value(entity, &mut pos);
        Vector3::from(pos)
    }

    /// Push a force on the central atom of `entity` back onto its DOF.
    ///
    /// For each local DOF `d`, adds `Σ_c df[c] · ∂x_c/∂q_d` to `sink` at
    /// `output_slot * total_dofs + global_dof(entity, d)`.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is out of range or was not evaluated this step.
    #[track_caller]
    pub fn chain_rule<S: DerivativeSink + ?Sized>(
        &self,
        entity: usize,
        output_slot: usize,
        df: &Vector3<f64>,
        sink: &mut S,
    ) {
        self.stash
            .chain_rule(entity, output_slot, df.as_slice(), sink);
    }

    /// Chain rule for every entity, one force per central atom.
    ///
    /// # Panics
    ///
    /// Panics if `forces` does not hold one force per entity.
    #[track_caller]
    pub fn chain_rule_all<S: DerivativeSink + ?Sized>(
        &self,
        output_slot: usize,
        forces: &[Vector3<f64>],
        sink: &mut S,
    ) {
        self.check_force_count(forces);
        self.stash
            .chain_rule_all(output_slot, |i| forces[i].as_slice(), sink);
    }

    /// Project one force per central atom onto the DOF and accumulate it
    /// for [`apply_force`](Vessel::apply_force).
    ///
    /// # Panics
    ///
    /// Panics if `forces` does not hold one force per entity.
    #[track_caller]
    pub fn project_forces(&mut self, forces: &[Vector3<f64>]) {
        self.check_force_count(forces);
        self.stash.project_into_forces(|i| forces[i].as_slice());
    }

    /// Parallel [`project_forces`](Self::project_forces).
    #[cfg(feature = "parallel")]
    #[track_caller]
    pub fn project_forces_par(&mut self, forces: &[Vector3<f64>]) {
        self.check_force_count(forces);
        self.stash.project_into_forces_par(|i| forces[i].as_slice());
    }

    #[track_caller]
    fn check_force_count(&self, forces: &[Vector3<f64>]) {
        if forces.len() != self.num_entities() {
            crate::VesselError::length_mismatch(self.num_entities(), forces.len()).violated();
        }
    }
}

impl Vessel for CentralAtomVessel {
    fn label(&self) -> &str {
        self.stash.label()
    }

    fn prepare(&mut self) {
        self.stash.prepare();
    }

    fn num_forces(&self) -> usize {
        self.stash.total_dofs()
    }

    fn add_forces(&mut self, forces: &[f64]) {
        self.stash.add_forces(forces);
    }

    fn apply_force(&mut self, out: &mut [f64]) -> bool {
        self.stash.apply_force(out)
    }
}

impl<P: CentralAtomProvider + ?Sized> StoringVessel<P> for CentralAtomVessel {
    type Output = Vector3<f64>;

    fn resize(&mut self, provider: &P) {
        self.stash.resize(provider);
    }

    fn calculate(&mut self, provider: &P, entity: usize) {
        let pos = provider.value(entity);
        self.stash
            .store(provider, entity, pos.as_slice(), |d, c| {
                provider.derivative(entity, d, c)
            });
    }

    fn value(&self, entity: usize) -> Vector3<f64> {
        self.position(entity)
    }
}
