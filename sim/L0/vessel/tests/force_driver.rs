//! Upstream force gathering across several vessels and consumers.

#![allow(clippy::float_cmp)]

use nalgebra::Vector3;
use sim_vessel::{
    CentralAtomProvider, CentralAtomVessel, EntityTopology, ScalarValueProvider, StoringVessel,
    ValueVessel, Vessel, apply_vessel_forces,
};

/// Three particles on a line; one entity per particle.
///
/// Central atom of particle `i` is the particle itself, its scalar value is
/// its x coordinate. Each particle owns DOF `3i..3i+3`.
struct Line {
    xs: Vec<f64>,
}

impl EntityTopology for Line {
    fn entity_count(&self) -> usize {
        self.xs.len()
    }

    fn derivative_count(&self, _: usize) -> usize {
        3
    }

    fn total_derivative_count(&self) -> usize {
        3 * self.xs.len()
    }

    fn global_dof_index(&self, entity: usize, local: usize) -> usize {
        3 * entity + local
    }
}

impl CentralAtomProvider for Line {
    fn value(&self, entity: usize) -> Vector3<f64> {
        Vector3::new(self.xs[entity], 0.0, 0.0)
    }

    fn derivative(&self, _: usize, local: usize, component: usize) -> f64 {
        if local == component { 1.0 } else { 0.0 }
    }
}

impl ScalarValueProvider for Line {
    fn value(&self, entity: usize) -> f64 {
        self.xs[entity]
    }

    fn derivative(&self, _: usize, local: usize) -> f64 {
        if local == 0 { 1.0 } else { 0.0 }
    }
}

fn line() -> Line {
    Line {
        xs: vec![0.0, 1.0, 2.0],
    }
}

fn ready_catoms(provider: &Line) -> CentralAtomVessel {
    let mut vessel = CentralAtomVessel::new();
    vessel.resize(provider);
    vessel.prepare();
    vessel.calculate_all(provider);
    vessel
}

#[test]
fn no_contributions_leave_target_untouched() {
    let provider = line();
    let mut catoms = ready_catoms(&provider);

    let mut out = vec![7.0; 9];
    assert!(!catoms.apply_force(&mut out));
    assert_eq!(out, vec![7.0; 9]);
}

#[test]
fn one_contribution_is_returned_exactly() {
    let provider = line();
    let mut catoms = ready_catoms(&provider);

    let forces: Vec<f64> = (0..9).map(|i| i as f64 * 0.5).collect();
    catoms.add_forces(&forces);

    let mut out = vec![0.0; 9];
    assert!(catoms.apply_force(&mut out));
    assert_eq!(out, forces);
}

#[test]
fn three_contributions_are_summed() {
    let provider = line();
    let mut catoms = ready_catoms(&provider);

    let a = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -1.0];
    let b = [0.5, 0.5, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0];
    let c = [0.25, 0.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 1.0];
    catoms.add_forces(&a);
    catoms.add_forces(&b);
    catoms.add_forces(&c);

    let mut out = vec![0.0; 9];
    assert!(catoms.apply_force(&mut out));
    for i in 0..9 {
        assert_eq!(out[i], a[i] + b[i] + c[i]);
    }
}

#[test]
fn driver_merges_forced_vessels_only() {
    let provider = line();
    let mut catoms = ready_catoms(&provider);

    let mut values = ValueVessel::new();
    values.resize(&provider);
    values.prepare();
    values.calculate_all(&provider);

    // Only the scalar vessel is forced this step
    values.project_forces(&[1.0, -2.0, 0.5]);

    let mut scratch = vec![0.0; 9];
    let mut global = vec![10.0; 9];
    let mut vessels: [&mut dyn Vessel; 2] = [&mut catoms, &mut values];
    let forced = apply_vessel_forces(&mut vessels, &mut scratch, &mut global);

    assert!(forced);
    assert_eq!(
        global,
        vec![11.0, 10.0, 10.0, 8.0, 10.0, 10.0, 10.5, 10.0, 10.0]
    );
}

#[test]
fn driver_with_both_vessels_forced() {
    let provider = line();
    let mut catoms = ready_catoms(&provider);
    catoms.project_forces(&[Vector3::new(0.0, 1.0, 0.0); 3]);

    let mut values = ValueVessel::new();
    values.resize(&provider);
    values.prepare();
    values.calculate_all(&provider);
    values.project_forces(&[1.0; 3]);

    let mut scratch = vec![0.0; 9];
    let mut global = vec![0.0; 9];
    let mut vessels: [&mut dyn Vessel; 2] = [&mut catoms, &mut values];
    assert!(apply_vessel_forces(&mut vessels, &mut scratch, &mut global));
    assert_eq!(global, vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
}

#[test]
fn driver_reports_nothing_when_idle() {
    let provider = line();
    let mut catoms = ready_catoms(&provider);

    let mut scratch = vec![0.0; 9];
    let mut global = vec![0.0; 9];
    let mut vessels: [&mut dyn Vessel; 1] = [&mut catoms];
    assert!(!apply_vessel_forces(&mut vessels, &mut scratch, &mut global));
    assert!(global.iter().all(|&g| g == 0.0));
}

#[test]
#[should_panic(expected = "length mismatch")]
fn driver_rejects_wrong_global_length() {
    let provider = line();
    let mut catoms = ready_catoms(&provider);

    let mut scratch = vec![0.0; 4];
    let mut global = vec![0.0; 4];
    let mut vessels: [&mut dyn Vessel; 1] = [&mut catoms];
    let _ = apply_vessel_forces(&mut vessels, &mut scratch, &mut global);
}
