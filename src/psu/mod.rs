//! BK Precision 9130B triple-output power supply.
//!
//! A thin consumer of [`VisaDevice`](crate::visa::VisaDevice): every
//! operation maps onto one write or one query of the [`PsuCommand`] set,
//! with the supply's limits checked before anything is sent.

pub mod bk9130b;
pub mod command;
pub mod sim;

pub use bk9130b::{Bk9130b, Bk9130bSettings, DEVICE_NAME, NO_DEVICES_FOUND};
pub use command::{all_outputs_off, Channel, PsuCommand};
pub use sim::simulated_bk9130b;

use crate::visa::AccessMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Host error code for failures without a dedicated code.
pub const DEVICE_ERR: i32 = 1;

/// Locking requested when the supply is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// No lock.
    #[default]
    None,
    /// Shared lock.
    Shared,
    /// Exclusive lock.
    Exclusive,
}

impl From<LockMode> for AccessMode {
    fn from(mode: LockMode) -> Self {
        match mode {
            LockMode::None => AccessMode::NoLock,
            LockMode::Shared => AccessMode::Shared,
            LockMode::Exclusive => AccessMode::Exclusive,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockMode::None => "None",
            LockMode::Shared => "Shared",
            LockMode::Exclusive => "Exclusive",
        })
    }
}

impl FromStr for LockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(LockMode::None),
            "shared" => Ok(LockMode::Shared),
            "exclusive" => Ok(LockMode::Exclusive),
            other => Err(format!(
                "Invalid lock mode '{}'. Must be one of: None, Shared, Exclusive",
                other
            )),
        }
    }
}

/// Errors reported by the power-supply adapter.
///
/// Failures that went through the instrument carry the core's diagnostic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PsuError {
    #[error("Invalid channel given: '{0}' (must be CH1, CH2 or CH3)")]
    InvalidChannel(String),

    #[error("Invalid voltage request {requested} V: must be 0-30 V for CH1 & CH2 and 0-5 V for CH3")]
    InvalidVoltage {
        /// Value the caller asked for.
        requested: f64,
        /// Value actually written after clamping, if any was written.
        applied: Option<f64>,
    },

    #[error("Invalid current request {0} A: must be 0-3 A")]
    InvalidCurrent(f64),

    #[error("Write operation failed: {0}")]
    WriteFailed(String),

    #[error("Read operation failed: {0}")]
    ReadFailed(String),

    #[error("Query operation failed: {0}")]
    QueryFailed(String),

    #[error("Power supply is not initialized")]
    NotInitialized,

    #[error("Failed to open '{device}': {reason}")]
    OpenFailed { device: String, reason: String },

    #[error("Failed to close power supply: {0}")]
    CloseFailed(String),

    #[error("Device ID '{0}' is not among the discovered instruments")]
    InvalidDeviceId(String),

    #[error("Timeout {0} ms out of range (0-1000000 ms)")]
    InvalidTimeout(u64),

    #[error("'{0}' can only be changed before initialization")]
    PreInitOnly(&'static str),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

impl PsuError {
    /// Numeric code reported to the host framework.
    pub fn code(&self) -> i32 {
        match self {
            PsuError::InvalidChannel(_) => 102,
            PsuError::InvalidVoltage { .. } => 103,
            PsuError::InvalidCurrent(_) => 104,
            PsuError::WriteFailed(_) => 105,
            PsuError::ReadFailed(_) => 106,
            PsuError::QueryFailed(_) => 107,
            _ => DEVICE_ERR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(PsuError::InvalidChannel("CH9".into()).code(), 102);
        assert_eq!(
            PsuError::InvalidVoltage {
                requested: 7.0,
                applied: Some(5.0)
            }
            .code(),
            103
        );
        assert_eq!(PsuError::InvalidCurrent(4.0).code(), 104);
        assert_eq!(PsuError::WriteFailed(String::new()).code(), 105);
        assert_eq!(PsuError::ReadFailed(String::new()).code(), 106);
        assert_eq!(PsuError::QueryFailed(String::new()).code(), 107);
        assert_eq!(PsuError::NotInitialized.code(), DEVICE_ERR);
    }

    #[test]
    fn lock_mode_conversion() {
        assert_eq!(AccessMode::from(LockMode::None), AccessMode::NoLock);
        assert_eq!(AccessMode::from(LockMode::Shared), AccessMode::Shared);
        assert_eq!(AccessMode::from(LockMode::Exclusive), AccessMode::Exclusive);
        assert_eq!("Exclusive".parse::<LockMode>(), Ok(LockMode::Exclusive));
        assert!("Partial".parse::<LockMode>().is_err());
        assert_eq!(LockMode::Shared.to_string(), "Shared");
    }
}
