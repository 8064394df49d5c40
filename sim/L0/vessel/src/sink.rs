//! Targets for chain-rule output.

use nalgebra::DVector;

use crate::error::VesselError;

/// Anything that can receive generalized-force contributions by index.
///
/// The chain rule writes `df[c] * ∂x_c/∂q_d` into the sink at the global
/// index of DOF `d`, offset by `output_slot * total_dofs`. Sinks always add;
/// they never overwrite.
///
/// Writing past the end of a sink is a contract violation: the built-in
/// sinks panic with [`VesselError::DofOutOfRange`].
pub trait DerivativeSink {
    /// Add `value` to element `index`.
    fn add_element_derivative(&mut self, index: usize, value: f64);
}

/// Add into a dense slice, panicking with a diagnostic when out of range.
#[inline]
#[track_caller]
pub(crate) fn add_checked(target: &mut [f64], index: usize, value: f64) {
    match target.get_mut(index) {
        Some(slot) => *slot += value,
        None => VesselError::dof_out_of_range(index, target.len()).violated(),
    }
}

impl DerivativeSink for [f64] {
    #[inline]
    #[track_caller]
    fn add_element_derivative(&mut self, index: usize, value: f64) {
        add_checked(self, index, value);
    }
}

impl DerivativeSink for Vec<f64> {
    #[inline]
    #[track_caller]
    fn add_element_derivative(&mut self, index: usize, value: f64) {
        add_checked(self, index, value);
    }
}

impl DerivativeSink for DVector<f64> {
    #[inline]
    #[track_caller]
    fn add_element_derivative(&mut self, index: usize, value: f64) {
        add_checked(self.as_mut_slice(), index, value);
    }
}

impl<S: DerivativeSink + ?Sized> DerivativeSink for &mut S {
    #[inline]
    fn add_element_derivative(&mut self, index: usize, value: f64) {
        (**self).add_element_derivative(index, value);
    }
}
