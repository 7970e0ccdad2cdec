//! Error types for device session operations
//!
//! Every failure the transport, codec or session can produce is a
//! [`DeviceError`]. The UI never sees these as panics: the session surfaces
//! them as `bluetoothError` events and as `Err` values from its public calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for device session operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The host cannot do BLE at all
    #[error("Bluetooth Low Energy is not supported on this host")]
    BluetoothUnsupported,

    /// BLE exists but an environmental precondition is missing
    /// (authorisation, location permission, secure context)
    #[error("Bluetooth permission denied: {0}")]
    PermissionDenied(String),

    /// The user dismissed the device chooser
    #[error("Device selection was cancelled")]
    UserCancelled,

    /// No device advertising the HC03 service was found
    #[error("No compatible HC03 device found")]
    DeviceNotFound,

    /// GATT connection did not complete in time
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The link dropped while connected
    #[error("Connection to the device was lost")]
    ConnectionLost,

    /// An operation needed a connected device
    #[error("Device not connected")]
    NotConnected,

    /// A connect attempt is already running
    #[error("A connection attempt is already in progress")]
    AlreadyInProgress,

    /// A measurement parameter is outside its enumerated set
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Writing a command characteristic failed
    #[error("Failed to write command: {0}")]
    WriteFailed(String),

    /// The backend did not accept a reading
    #[error("Failed to persist reading: {0}")]
    PersistenceFailure(String),

    /// Any other error from the Bluetooth stack
    #[error("Bluetooth transport error: {0}")]
    Transport(String),
}

/// Serialisable error category carried in `bluetoothError` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    BluetoothUnsupported,
    PermissionDenied,
    UserCancelled,
    DeviceNotFound,
    ConnectionTimeout,
    ConnectionLost,
    NotConnected,
    AlreadyInProgress,
    InvalidParameter,
    WriteFailed,
    PersistenceFailure,
    Transport,
}

impl DeviceError {
    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::BluetoothUnsupported => ErrorKind::BluetoothUnsupported,
            DeviceError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            DeviceError::UserCancelled => ErrorKind::UserCancelled,
            DeviceError::DeviceNotFound => ErrorKind::DeviceNotFound,
            DeviceError::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            DeviceError::ConnectionLost => ErrorKind::ConnectionLost,
            DeviceError::NotConnected => ErrorKind::NotConnected,
            DeviceError::AlreadyInProgress => ErrorKind::AlreadyInProgress,
            DeviceError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            DeviceError::WriteFailed(_) => ErrorKind::WriteFailed,
            DeviceError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            DeviceError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Check if the user can recover by retrying or reconnecting
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            DeviceError::BluetoothUnsupported | DeviceError::InvalidParameter(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            DeviceError::BluetoothUnsupported => "BLUETOOTH_UNSUPPORTED",
            DeviceError::PermissionDenied(_) => "PERMISSION_DENIED",
            DeviceError::UserCancelled => "USER_CANCELLED",
            DeviceError::DeviceNotFound => "DEVICE_NOT_FOUND",
            DeviceError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            DeviceError::ConnectionLost => "CONNECTION_LOST",
            DeviceError::NotConnected => "NOT_CONNECTED",
            DeviceError::AlreadyInProgress => "ALREADY_IN_PROGRESS",
            DeviceError::InvalidParameter(_) => "INVALID_PARAMETER",
            DeviceError::WriteFailed(_) => "WRITE_FAILED",
            DeviceError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            DeviceError::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl From<bluest::Error> for DeviceError {
    fn from(err: bluest::Error) -> Self {
        use bluest::error::ErrorKind as BluestKind;

        match err.kind() {
            BluestKind::AdapterUnavailable | BluestKind::NotSupported => {
                DeviceError::BluetoothUnsupported
            }
            BluestKind::NotAuthorized => DeviceError::PermissionDenied(err.to_string()),
            BluestKind::NotConnected => DeviceError::ConnectionLost,
            BluestKind::NotFound => DeviceError::DeviceNotFound,
            _ => DeviceError::Transport(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(err: reqwest::Error) -> Self {
        DeviceError::PersistenceFailure(err.to_string())
    }
}
