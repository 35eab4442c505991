//! Error taxonomy for registration and dispatch.
//!
//! None of these errors is fatal to the process: each one describes the
//! failure of a single registration or a single command.

use serde::Serialize;
use thiserror::Error;

use crate::model::DeviceId;

/// Registration of one device failed; the registry itself is unaffected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("device label must not be empty")]
    EmptyLabel,

    #[error("device '{label}' declared as {declared} but its backend drives {actual}")]
    KindMismatch {
        label: String,
        declared: crate::model::DeviceKind,
        actual: crate::model::DeviceKind,
    },

    #[error("setup of device '{label}' failed: {reason}")]
    Setup { label: String, reason: String },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown device: {0}")]
pub struct UnknownDeviceError(pub DeviceId);

/// Failure of one dispatched command.
///
/// `Execution` means the command had no effect; `Disconnection` means the
/// effect took place but cleanup failed afterwards.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    UnknownDevice(#[from] UnknownDeviceError),

    #[error("connecting to {device} failed: {reason}")]
    Connection { device: DeviceId, reason: String },

    #[error("executing on {device} failed: {reason}")]
    Execution { device: DeviceId, reason: String },

    #[error("disconnecting from {device} failed after the command took effect: {reason}")]
    Disconnection { device: DeviceId, reason: String },
}

/// Discriminant of [`DispatchError`], for callers that only branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownDevice,
    Connection,
    Execution,
    Disconnection,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::UnknownDevice(_) => ErrorKind::UnknownDevice,
            DispatchError::Connection { .. } => ErrorKind::Connection,
            DispatchError::Execution { .. } => ErrorKind::Execution,
            DispatchError::Disconnection { .. } => ErrorKind::Disconnection,
        }
    }

    /// True when the command's effect took place despite the error.
    pub fn effect_applied(&self) -> bool {
        matches!(self, DispatchError::Disconnection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::from(UnknownDeviceError(DeviceId(3)));
        assert_eq!(err.to_string(), "unknown device: device-3");
        assert_eq!(err.kind(), ErrorKind::UnknownDevice);

        let err = DispatchError::Connection {
            device: DeviceId(1),
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "connecting to device-1 failed: timeout");

        assert_eq!(
            RegistrationError::EmptyLabel.to_string(),
            "device label must not be empty"
        );
    }

    #[test]
    fn test_effect_applied() {
        let device = DeviceId(0);
        let reason = String::from("boom");
        assert!(
            DispatchError::Disconnection { device, reason: reason.clone() }.effect_applied()
        );
        assert!(!DispatchError::Execution { device, reason }.effect_applied());
    }
}
