//! Error handling for the EEG lab toolkit
//!
//! Separates transport failures (`PublishError`) from the toolkit-wide
//! `LabError` so callers can decide which failures to contain.

use thiserror::Error;

/// Result type alias for toolkit operations
pub type LabResult<T> = Result<T, LabError>;

/// Error type for every toolkit operation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LabError {
    /// Rejected configuration (zero channels, bad sample rate, dangling phase edge...)
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Description of the configuration problem
        reason: String,
    },

    /// Phase name not present in the phase graph
    #[error("Invalid phase: '{phase}' is not defined in the phase graph")]
    InvalidPhase {
        /// Requested phase name
        phase: String,
    },

    /// Outlet failed to deliver a sample or chunk
    #[error("Publish failure: {0}")]
    Publish(#[from] PublishError),

    /// Numeric synthesis failure
    #[error("Synthesis error: {reason}")]
    Synthesis {
        /// Description of the failure
        reason: String,
    },

    /// I/O error while reading configuration or montage files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LabError {
    /// Shorthand for building a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        LabError::Configuration {
            reason: reason.into(),
        }
    }
}

/// Transport-level send error reported by an outlet
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PublishError {
    /// The outlet was closed or its consumer went away
    #[error("outlet disconnected")]
    Disconnected,

    /// The outlet refused the payload
    #[error("outlet rejected payload: {reason}")]
    Rejected {
        /// Reason given by the outlet
        reason: String,
    },

    /// Underlying writer failed
    #[error("outlet write failed: {0}")]
    Io(#[from] std::io::Error),
}
