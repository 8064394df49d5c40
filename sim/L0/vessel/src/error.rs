//! Error types for derivative stashing and force propagation.
//!
//! Most of these describe contract violations. The vessel code panics with
//! the `Display` of the matching variant when a hot-path contract is broken,
//! and returns them as values from the few checks that are recoverable
//! (topology checks, configuration validation).

use thiserror::Error;

/// Errors that can occur while stashing derivatives or propagating forces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VesselError {
    /// Entity index outside the current entity set.
    #[error("entity index {index} out of range (entity count {count})")]
    EntityOutOfRange {
        /// The requested entity.
        index: usize,
        /// Number of entities after the last resize.
        count: usize,
    },

    /// A force or output vector has the wrong length.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length required by the accumulator.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// An entity was read before it was evaluated in the current pass.
    #[error("entity {entity} read before it was evaluated in this pass")]
    NotEvaluated {
        /// The entity that was read.
        entity: usize,
    },

    /// A flat buffer offset outside the buffer.
    #[error("buffer offset {offset} out of range (buffer length {len})")]
    OffsetOutOfRange {
        /// The offending offset.
        offset: usize,
        /// Current buffer length.
        len: usize,
    },

    /// A provider mapped a local DOF outside the global DOF space.
    #[error("global DOF index {index} out of range (total DOF {total})")]
    DofOutOfRange {
        /// The mapped global index.
        index: usize,
        /// Size of the global DOF space.
        total: usize,
    },

    /// The vessel was used before its first resize.
    #[error("vessel '{label}' used before resize")]
    NotResized {
        /// Diagnostic label of the vessel.
        label: String,
    },

    /// The provider's topology no longer matches the last resize.
    #[error("stale topology: {reason}")]
    StaleTopology {
        /// What changed since the last resize.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VesselError {
    /// Create an entity out of range error.
    #[must_use]
    pub const fn entity_out_of_range(index: usize, count: usize) -> Self {
        Self::EntityOutOfRange { index, count }
    }

    /// Create a length mismatch error.
    #[must_use]
    pub const fn length_mismatch(expected: usize, actual: usize) -> Self {
        Self::LengthMismatch { expected, actual }
    }

    /// Create a read-before-write error.
    #[must_use]
    pub const fn not_evaluated(entity: usize) -> Self {
        Self::NotEvaluated { entity }
    }

    /// Create an offset out of range error.
    #[must_use]
    pub const fn offset_out_of_range(offset: usize, len: usize) -> Self {
        Self::OffsetOutOfRange { offset, len }
    }

    /// Create a global DOF out of range error.
    #[must_use]
    pub const fn dof_out_of_range(index: usize, total: usize) -> Self {
        Self::DofOutOfRange { index, total }
    }

    /// Create a not-resized error.
    #[must_use]
    pub fn not_resized(label: impl Into<String>) -> Self {
        Self::NotResized {
            label: label.into(),
        }
    }

    /// Create a stale topology error.
    #[must_use]
    pub fn stale_topology(reason: impl Into<String>) -> Self {
        Self::StaleTopology {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Abort with this error as the diagnostic.
    ///
    /// Used for structural contract violations, which are never recoverable:
    /// continuing would hand wrong forces to the integrator.
    #[cold]
    #[track_caller]
    #[allow(clippy::panic)]
    pub fn violated(self) -> ! {
        panic!("contract violation: {self}")
    }
}

/// Result type for vessel operations.
pub type Result<T> = std::result::Result<T, VesselError>;
