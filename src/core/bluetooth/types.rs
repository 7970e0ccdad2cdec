//! Defines shared data structures for the Bluetooth module.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Represents a discovered HC03 device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Platform-specific unique identifier for the device (opaque)
    pub id: String,
    /// The advertised name, or a placeholder when the device has none
    pub name: String,
    /// MAC address when the platform exposes one inside the id
    pub address: Option<String>,
    /// The signal strength (RSSI) at discovery time
    pub rssi: Option<i16>,
}

impl DeviceInfo {
    /// Creates a new DeviceInfo instance
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
            rssi: None,
        }
    }

    pub fn with_address(mut self, address: Option<String>) -> Self {
        self.address = address;
        self
    }

    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }
}

/// Lifecycle state of the single device link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    /// Part of the state vocabulary shown to the UI; the session itself never
    /// reconnects, a fresh `connect()` is always user-initiated.
    Reconnecting,
}

impl ConnectionState {
    /// Whether `next` is a legal successor. Connected is only reachable
    /// through Connecting.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Scanning)
                | (Scanning, Connecting)
                | (Scanning, Disconnected)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
        )
    }

    /// A connect attempt is running
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConnectionState::Scanning | ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Scanning => write!(f, "scanning"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// The one BLE link a session owns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceConnection {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub connection_state: ConnectionState,
    pub last_error: Option<DeviceError>,
}

impl DeviceConnection {
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Scanning.to_string(), "scanning");
    }

    #[test]
    fn test_connected_requires_connecting() {
        assert!(!ConnectionState::Disconnected.can_transition_to(ConnectionState::Connected));
        assert!(!ConnectionState::Scanning.can_transition_to(ConnectionState::Connected));
        assert!(ConnectionState::Connecting.can_transition_to(ConnectionState::Connected));
        assert!(ConnectionState::Connected.can_transition_to(ConnectionState::Disconnected));
    }
}
