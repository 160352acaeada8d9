//! Error type returned by the instrument session core.

use super::status::{AttrState, Attribute, Status};
use thiserror::Error;

/// Convenience alias for core results.
pub type VisaResult<T> = std::result::Result<T, VisaError>;

/// Failure of a [`VisaDevice`](super::VisaDevice) operation.
///
/// Variants carrying a `status` came from the driver and were also recorded
/// as the device's last error. The precondition variants never reach the
/// driver and leave the last error untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VisaError {
    /// The resource-manager session could not be acquired at construction.
    #[error("VISA resource manager session is not initialized")]
    NotInitialized,

    /// The operation needs an open device.
    #[error("No VISA device is open")]
    NotOpen,

    /// `open` was called while a device handle is still live.
    #[error("A VISA device is already open ({0})")]
    AlreadyOpen(String),

    /// A driver call returned a negative status.
    #[error("{description} [{status}]")]
    Driver {
        /// Raw status reported by the driver.
        status: Status,
        /// Driver-provided description of `status`.
        description: String,
    },

    /// The device opened but its termination character could not be read,
    /// so the handle was released again.
    #[error("Failed to read termination character, device closed: {description} [{status}]")]
    TerminatorUnavailable {
        /// Status of the failed attribute read.
        status: Status,
        /// Driver-provided description of `status`.
        description: String,
    },

    /// An attribute value does not fit the requested numeric type.
    #[error("Attribute 0x{:08X} value {value} does not fit the requested type", .attribute.0)]
    AttributeOutOfRange {
        /// Attribute that was read.
        attribute: Attribute,
        /// Raw value reported by the driver.
        value: AttrState,
    },
}

impl VisaError {
    /// The driver status behind this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            VisaError::Driver { status, .. } | VisaError::TerminatorUnavailable { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// True when the driver was never called.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            VisaError::NotInitialized | VisaError::NotOpen | VisaError::AlreadyOpen(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display() {
        let err = VisaError::Driver {
            status: Status::ERROR_TMO,
            description: "Timeout expired before operation completed.".into(),
        };
        assert_eq!(
            err.to_string(),
            "Timeout expired before operation completed. [VI_ERROR_TMO (0xBFFF0015)]"
        );
        assert_eq!(err.status(), Some(Status::ERROR_TMO));
        assert!(!err.is_precondition());
    }

    #[test]
    fn precondition_errors_have_no_status() {
        assert!(VisaError::NotOpen.is_precondition());
        assert!(VisaError::NotInitialized.is_precondition());
        assert_eq!(VisaError::NotOpen.status(), None);
    }
}
