//! Derivative stashing and reverse-mode force propagation.
//!
//! Collective variables built from many entities (central atoms of
//! coordination spheres, per-molecule scalars, ...) need each entity's value
//! *and* the derivatives of that value with respect to every degree of
//! freedom it depends on. Consumers read the values, decide what force to put
//! on each one, and that force must be pushed back onto the original degrees
//! of freedom. This crate is the storage and propagation layer in between.
//!
//! # Layout
//!
//! Every entity gets one contiguous block in a single flat buffer. Entities
//! depend on different numbers of DOF, so the blocks are ragged and located
//! through an [`OffsetTable`]:
//!
//! ```text
//! entity i, 3 components, n_i local DOF:
//!
//!   start[i]
//!   │ x  ∂x/∂q₀ … ∂x/∂qₙ │ y  ∂y/∂q₀ … ∂y/∂qₙ │ z  ∂z/∂q₀ … ∂z/∂qₙ │
//!   └──── n_i + 1 ───────┴──── n_i + 1 ───────┴──── n_i + 1 ───────┘ start[i+1]
//! ```
//!
//! No per-entity allocation happens; storage is rebuilt only when the
//! provider's topology changes (e.g. a neighbor list rebuild).
//!
//! # Per-step protocol
//!
//! 1. `resize` after any topology change
//! 2. `prepare` at the start of the step
//! 3. `calculate` every entity
//! 4. read values, run the chain rule, `add_forces` (any number of times)
//! 5. `apply_force` once, gated on its return value
//!
//! Protocol violations (reading an entity that was not calculated, force
//! vectors of the wrong length, out-of-range indices) panic with a
//! [`VesselError`] diagnostic rather than producing wrong forces.
//!
//! # Example
//!
//! ```
//! use nalgebra::Vector3;
//! use sim_vessel::{
//!     CentralAtomProvider, CentralAtomVessel, EntityTopology, StoringVessel, Vessel,
//! };
//!
//! /// Two entities owning 2 and 1 DOF out of 3.
//! struct Toy;
//!
//! impl EntityTopology for Toy {
//!     fn entity_count(&self) -> usize { 2 }
//!     fn derivative_count(&self, i: usize) -> usize { [2, 1][i] }
//!     fn total_derivative_count(&self) -> usize { 3 }
//!     fn global_dof_index(&self, i: usize, d: usize) -> usize { [0, 2][i] + d }
//! }
//!
//! impl CentralAtomProvider for Toy {
//!     fn value(&self, i: usize) -> Vector3<f64> {
//!         [Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0)][i]
//!     }
//!     fn derivative(&self, i: usize, d: usize, _c: usize) -> f64 {
//!         [[0.1, 0.2], [0.5, 0.0]][i][d]
//!     }
//! }
//!
//! let mut vessel = CentralAtomVessel::new();
//! vessel.resize(&Toy);
//! vessel.prepare();
//! vessel.calculate_all(&Toy);
//! assert_eq!(vessel.position(1), Vector3::new(4.0, 5.0, 6.0));
//!
//! let mut df = vec![0.0; 3];
//! vessel.chain_rule(0, 0, &Vector3::x(), &mut df);
//! vessel.add_forces(&df);
//!
//! let mut out = vec![0.0; 3];
//! assert!(vessel.apply_force(&mut out));
//! assert_eq!(out, vec![0.1, 0.2, 0.0]);
//! ```
//!
//! # Features
//!
//! - `parallel`: rayon-backed `calculate_all_par` / `project_forces_par`
//! - `serde`: serialization of [`VesselConfig`]
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**. It can be used in:
//!
//! - Headless simulation drivers
//! - Enhanced-sampling plugins for external MD engines
//! - Analysis tools

#![doc(html_root_url = "https://docs.rs/sim-vessel/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,   // Many methods can't be const due to nalgebra
    clippy::module_name_repetitions,
    clippy::doc_markdown,           // Not all technical terms need backticks
    clippy::missing_panics_doc,     // Contract panics are documented on the protocol
    clippy::cast_precision_loss,    // usize to f64 is fine for test fixtures
)]
#![cfg_attr(test, allow(clippy::float_cmp))]

pub mod accumulator;
pub mod buffer;
pub mod central;
pub mod config;
pub mod error;
pub mod offsets;
pub mod provider;
pub mod sink;
pub mod stash;
pub mod values;
pub mod vessel;

// Re-export main types at crate root
pub use accumulator::ForceAccumulator;
pub use buffer::FlatDerivativeBuffer;
pub use central::CentralAtomVessel;
pub use config::VesselConfig;
pub use error::{Result, VesselError};
pub use offsets::{OffsetTable, VECTOR_COMPONENTS};
pub use provider::{CentralAtomProvider, EntityTopology, ScalarValueProvider};
pub use sink::DerivativeSink;
pub use stash::{DerivativeStash, StepPhase};
pub use values::ValueVessel;
pub use vessel::{StoringVessel, Vessel, apply_vessel_forces};
