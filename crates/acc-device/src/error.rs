//! Error types for accelerator operations

use thiserror::Error;

/// Result type alias for accelerator operations
pub type Result<T> = std::result::Result<T, AccError>;

/// Errors that can occur while modelling the accelerator
#[derive(Debug, Error)]
pub enum AccError {
    /// Malformed MMIO access (bad length, byte enables, streaming width)
    #[error("Bus error at BAR offset {offset:#x}: {reason}")]
    BusError {
        /// BAR offset of the access
        offset: u64,
        /// Why the access was rejected
        reason: String,
    },

    /// The remote translation service declined the request
    #[error("Translation declined for {virt_addr:#x}")]
    TranslationDeclined {
        /// Requested virtual address
        virt_addr: u64,
    },

    /// The remote translation service answered with an unusable granule
    #[error("Invalid translation for {virt_addr:#x}: {reason}")]
    InvalidTranslation {
        /// Requested virtual address
        virt_addr: u64,
        /// What was wrong with the response
        reason: String,
    },

    /// Physical memory transaction failed
    #[error("Physical access at {phys_addr:#x} failed: {reason}")]
    Transport {
        /// Physical address of the failed access
        phys_addr: u64,
        /// Reason for failure
        reason: String,
    },

    /// Device stopped after a fail-fast transport error; reset to recover
    #[error("Device halted after a transport failure")]
    Halted,

    /// Configuration rejected
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason for rejection
        reason: String,
    },

    /// Device is in an invalid state for the requested operation
    #[error("Device in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },
}

impl AccError {
    /// Create a bus error
    pub fn bus_error(offset: u64, reason: impl Into<String>) -> Self {
        Self::BusError {
            offset,
            reason: reason.into(),
        }
    }

    /// Create an invalid translation error
    pub fn invalid_translation(virt_addr: u64, reason: impl Into<String>) -> Self {
        Self::InvalidTranslation {
            virt_addr,
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(phys_addr: u64, reason: impl Into<String>) -> Self {
        Self::Transport {
            phys_addr,
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }
}
