//! Scalar value stash.
//!
//! The one-component counterpart of [`CentralAtomVessel`](crate::CentralAtomVessel):
//! each entity stores a single value followed by its derivatives.

use crate::config::VesselConfig;
use crate::provider::ScalarValueProvider;
use crate::sink::DerivativeSink;
use crate::stash::{DerivativeStash, StepPhase};
use crate::vessel::{StoringVessel, Vessel};

/// Stash of one scalar per entity and its derivatives.
#[derive(Debug, Clone)]
pub struct ValueVessel {
    stash: DerivativeStash,
}

impl Default for ValueVessel {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueVessel {
    /// Default diagnostic label.
    pub const LABEL: &'static str = "values";

    /// Create an unsized vessel with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(VesselConfig::labeled(Self::LABEL))
    }

    /// Create an unsized vessel with the given configuration.
    #[must_use]
    pub fn with_config(config: VesselConfig) -> Self {
        Self {
            stash: DerivativeStash::new(1, config),
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

    /// Evaluate every entity on the rayon pool.
    #[cfg(feature = "parallel")]
    pub fn calculate_all_par<P: ScalarValueProvider + Sync + ?Sized>(&mut self, provider: &P) {
        self.stash.store_all_par(
            provider,
            |i| [provider.value(i)],
            |i, d, _| provider.derivative(i, d),
        );
    }

    /// Stored value of `entity`.
    #[must_use]
    #[track_caller]
    pub fn get_value(&self, entity: usize) -> f64 {
        let mut v = [0.0];
        self.stash.read_value(entity, &mut v);
        v[0]
    }

    /// Push a force `df` on the value of `entity` back onto its DOF.
    #[track_caller]
    pub fn chain_rule<S: DerivativeSink + ?Sized>(
        &self,
        entity: usize,
        output_slot: usize,
        df: f64,
        sink: &mut S,
    ) {
        self.stash.chain_rule(entity, output_slot, &[df], sink);
    }

    /// Chain rule for every entity, one force per value.
    ///
    /// # Panics
    ///
    /// Panics if `forces` does not hold one force per entity.
    #[track_caller]
    pub fn chain_rule_all<S: DerivativeSink + ?Sized>(
        &self,
        output_slot: usize,
        forces: &[f64],
        sink: &mut S,
    ) {
        self.check_force_count(forces);
        self.stash
            .chain_rule_all(output_slot, |i| [forces[i]], sink);
    }

    /// Project one force per value onto the DOF and accumulate it.
    ///
    /// # Panics
    ///
    /// Panics if `forces` does not hold one force per entity.
    #[track_caller]
    pub fn project_forces(&mut self, forces: &[f64]) {
        self.check_force_count(forces);
        self.stash.project_into_forces(|i| [forces[i]]);
    }

    /// Parallel [`project_forces`](Self::project_forces).
    #[cfg(feature = "parallel")]
    #[track_caller]
    pub fn project_forces_par(&mut self, forces: &[f64]) {
        self.check_force_count(forces);
        self.stash.project_into_forces_par(|i| [forces[i]]);
    }

    #[track_caller]
    fn check_force_count(&self, forces: &[f64]) {
        if forces.len() != self.num_entities() {
            crate::VesselError::length_mismatch(self.num_entities(), forces.len()).violated();
        }
    }
}

impl Vessel for ValueVessel {
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

impl<P: ScalarValueProvider + ?Sized> StoringVessel<P> for ValueVessel {
    type Output = f64;

    fn resize(&mut self, provider: &P) {
        self.stash.resize(provider);
    }

    fn calculate(&mut self, provider: &P, entity: usize) {
        let value = provider.value(entity);
        self.stash
            .store(provider, entity, [value], |d, _| provider.derivative(entity, d));
    }

    fn value(&self, entity: usize) -> f64 {
        self.get_value(entity)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::provider::EntityTopology;

    /// Squared distance of each particle from the origin along x.
    struct SquaredX(Vec<f64>);

    impl EntityTopology for SquaredX {
        fn entity_count(&self) -> usize {
            self.0.len()
        }

        fn derivative_count(&self, _: usize) -> usize {
            1
        }

        fn total_derivative_count(&self) -> usize {
            self.0.len()
        }

        fn global_dof_index(&self, entity: usize, _: usize) -> usize {
            entity
        }
    }

    impl ScalarValueProvider for SquaredX {
        fn value(&self, entity: usize) -> f64 {
            self.0[entity] * self.0[entity]
        }

        fn derivative(&self, entity: usize, _: usize) -> f64 {
            2.0 * self.0[entity]
        }
    }

    #[test]
    fn test_scalar_layout() {
        let provider = SquaredX(vec![1.0, -3.0]);
        let mut vessel = ValueVessel::new();
        vessel.resize(&provider);
        vessel.prepare();
        vessel.calculate_all(&provider);

        assert_eq!(vessel.stash().buffer().as_slice(), &[1.0, 2.0, 9.0, -6.0]);
        assert_eq!(vessel.get_value(1), 9.0);
    }

    #[test]
    fn test_scalar_chain_rule() {
        let provider = SquaredX(vec![1.5, 2.0]);
        let mut vessel = ValueVessel::new();
        vessel.resize(&provider);
        vessel.prepare();
        vessel.calculate_all(&provider);

        vessel.project_forces(&[-1.0, 0.5]);
        let mut out = [0.0; 2];
        assert!(vessel.apply_force(&mut out));
        assert_eq!(out, [-3.0, 2.0]);
    }

    #[test]
    fn test_scalar_chain_rule_all_into_second_slot() {
        let provider = SquaredX(vec![1.0, 3.0]);
        let mut vessel = ValueVessel::new();
        vessel.resize(&provider);
        vessel.prepare();
        vessel.calculate_all(&provider);

        let mut sink = vec![0.0; 4];
        vessel.chain_rule_all(1, &[1.0, 0.5], &mut sink);
        assert_eq!(sink, vec![0.0, 0.0, 2.0, 3.0]);
        assert_eq!(vessel.phase(), StepPhase::Evaluating);
    }
}
