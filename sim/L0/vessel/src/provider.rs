//! The domain side of the vessel contract.
//!
//! A provider owns the physics: it knows how many entities exist, which
//! global degrees of freedom each one depends on, and how to evaluate the
//! value and its derivatives. Vessels only store and propagate what the
//! provider hands them. Every call names its entity explicitly, so a
//! provider can be shared by parallel workers.

use nalgebra::Vector3;

/// Entity set and degree-of-freedom layout.
pub trait EntityTopology {
    /// Number of entities in the current topology.
    fn entity_count(&self) -> usize;

    /// Number of local degrees of freedom of `entity`.
    fn derivative_count(&self, entity: usize) -> usize;

    /// Size of the global DOF space the forces are expressed in.
    fn total_derivative_count(&self) -> usize;

    /// Global DOF index of local DOF `local` of `entity`.
    fn global_dof_index(&self, entity: usize, local: usize) -> usize;
}

/// Provider of a 3-vector value per entity (e.g. a central atom position).
pub trait CentralAtomProvider: EntityTopology {
    /// Value of `entity`.
    fn value(&self, entity: usize) -> Vector3<f64>;

    /// `∂ value[component] / ∂ q_local` for `entity`.
    fn derivative(&self, entity: usize, local: usize, component: usize) -> f64;
}

/// Provider of a scalar value per entity.
pub trait ScalarValueProvider: EntityTopology {
    /// Value of `entity`.
    fn value(&self, entity: usize) -> f64;

    /// `∂ value / ∂ q_local` for `entity`.
    fn derivative(&self, entity: usize, local: usize) -> f64;
}

impl<T: EntityTopology + ?Sized> EntityTopology for &T {
    fn entity_count(&self) -> usize {
        (**self).entity_count()
    }

    fn derivative_count(&self, entity: usize) -> usize {
        (**self).derivative_count(entity)
    }

    fn total_derivative_count(&self) -> usize {
        (**self).total_derivative_count()
    }

    fn global_dof_index(&self, entity: usize, local: usize) -> usize {
        (**self).global_dof_index(entity, local)
    }
}

impl<T: CentralAtomProvider + ?Sized> CentralAtomProvider for &T {
    fn value(&self, entity: usize) -> Vector3<f64> {
        (**self).value(entity)
    }

    fn derivative(&self, entity: usize, local: usize, component: usize) -> f64 {
        (**self).derivative(entity, local, component)
    }
}

impl<T: ScalarValueProvider + ?Sized> ScalarValueProvider for &T {
    fn value(&self, entity: usize) -> f64 {
        (**self).value(entity)
    }

    fn derivative(&self, entity: usize, local: usize) -> f64 {
        (**self).derivative(entity, local)
    }
}
