//! Accelerator configuration
//!
//! All knobs have defaults matching the reference endpoint: 4 KiB granule,
//! fail-fast on physical transport errors, translation cache kept across
//! reset.

use crate::error::{AccError, Result};
use acc_chip::ats::SZ_4K;
use tracing::debug;

/// What a Worker does when a physical memory transaction fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportFailurePolicy {
    /// Stop the Worker and halt the device until reset. The error is
    /// returned from `run_pending()`; STATUS is not written.
    #[default]
    FailFast,

    /// Stop the Worker and report `DONE | ERR` in STATUS.
    ReportError,
}

/// Accelerator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorConfig {
    /// Translation granule: fill alignment and Translate stride. Checksum
    /// chunks follow the granule each cached region was answered with.
    /// Non-zero power of two.
    pub granule: u64,

    /// Physical transport failure handling
    pub transport_failure: TransportFailurePolicy,

    /// Flush the translation cache when reset is asserted
    pub flush_atc_on_reset: bool,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            granule: SZ_4K,
            transport_failure: TransportFailurePolicy::FailFast,
            flush_atc_on_reset: false,
        }
    }
}

impl AcceleratorConfig {
    /// Set the translation granule.
    #[must_use]
    pub const fn with_granule(mut self, granule: u64) -> Self {
        self.granule = granule;
        self
    }

    /// Set the transport failure policy.
    #[must_use]
    pub const fn with_transport_failure(mut self, policy: TransportFailurePolicy) -> Self {
        self.transport_failure = policy;
        self
    }

    /// Flush the translation cache on reset.
    #[must_use]
    pub const fn with_flush_on_reset(mut self, flush: bool) -> Self {
        self.flush_atc_on_reset = flush;
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the granule is zero or not a power of two.
    pub fn validate(&self) -> Result<()> {
        if !self.granule.is_power_of_two() {
            return Err(AccError::invalid_config(format!(
                "granule {:#x} is not a non-zero power of two",
                self.granule
            )));
        }
        debug!("Accelerator config ok: {self:?}");
        Ok(())
    }
}
