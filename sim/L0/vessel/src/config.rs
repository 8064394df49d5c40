//! Configuration for derivative vessels.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Settings shared by every vessel variant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VesselConfig {
    /// Diagnostic name used in logs and panic messages.
    pub label: String,

    /// Also zero the flat buffer in `prepare()`.
    ///
    /// Every slot is overwritten by `calculate`, so this only matters when
    /// debugging a provider that skips entities. Default: false
    pub zero_fill_on_prepare: bool,

    /// Minimum number of entities handed to one rayon task by the parallel
    /// entry points. Default: 64
    pub parallel_grain: usize,

    /// Panic when an entity is read before it was evaluated in this pass.
    /// Default: true
    pub check_evaluated: bool,
}

impl Default for VesselConfig {
    fn default() -> Self {
        Self {
            label: "vessel".to_string(),
            zero_fill_on_prepare: false,
            parallel_grain: 64,
            check_evaluated: true,
        }
    }
}

impl VesselConfig {
    /// Create a default configuration with the given label.
    #[must_use]
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Every check on, buffer zeroed at the start of each step.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            zero_fill_on_prepare: true,
            check_evaluated: true,
            ..Default::default()
        }
    }

    /// No zero fill, no read-before-write tracking, coarse parallel tasks.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            zero_fill_on_prepare: false,
            check_evaluated: false,
            parallel_grain: 512,
            ..Default::default()
        }
    }

    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set zero fill on prepare.
    #[must_use]
    pub const fn with_zero_fill(mut self, zero_fill: bool) -> Self {
        self.zero_fill_on_prepare = zero_fill;
        self
    }

    /// Set the parallel grain size.
    #[must_use]
    pub const fn with_parallel_grain(mut self, grain: usize) -> Self {
        self.parallel_grain = grain;
        self
    }

    /// Enable or disable read-before-write tracking.
    #[must_use]
    pub const fn with_check_evaluated(mut self, check: bool) -> Self {
        self.check_evaluated = check;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.parallel_grain == 0 {
            return Err(crate::VesselError::invalid_config(
                "parallel_grain must be at least 1",
            ));
        }
        if self.label.is_empty() {
            return Err(crate::VesselError::invalid_config("label must not be empty"));
        }
        Ok(())
    }
}
