//! Crate-level error type.
//!
//! Each layer keeps its own `thiserror` enum:
//!
//! - **`VisaError`**: session core failures, carrying the driver status and
//!   its text description
//! - **`PsuError`**: power-supply adapter failures with host error codes
//! - **`ConfigError`**: loading or validating configuration
//!
//! `DaqError` consolidates them so callers that touch several layers can use
//! `?` throughout. Binaries wrap everything in `anyhow`.

use crate::config::ConfigError;
use crate::psu::PsuError;
use crate::visa::VisaError;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("VISA error: {0}")]
    Visa(#[from] VisaError),

    #[error("Power supply error: {0}")]
    Psu(#[from] PsuError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("VISA support not enabled. Rebuild with --features instrument_visa")]
    VisaFeatureDisabled,
}

impl DaqError {
    /// Host error code for adapter failures, `None` otherwise.
    pub fn device_code(&self) -> Option<i32> {
        match self {
            DaqError::Psu(err) => Some(err.code()),
            _ => None,
        }
    }
}
