//! Transport adapter interface
//!
//! The session talks to the radio only through [`TransportAdapter`]. Two
//! implementations exist: `BluestTransport` for real hardware and
//! `SimulatedTransport` for tests and hardware-free runs.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::constants::{DEVICE_NAME_PREFIXES, UUID_HC03_SERVICE};
use crate::core::bluetooth::types::DeviceInfo;
use crate::error::Result;

/// Which advertisements `request_device` accepts
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFilter {
    pub name_prefixes: Vec<String>,
    pub service_uuid: Uuid,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            name_prefixes: DEVICE_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            service_uuid: UUID_HC03_SERVICE,
        }
    }
}

impl DeviceFilter {
    pub fn with_prefixes(prefixes: &[String]) -> Self {
        Self {
            name_prefixes: prefixes.to_vec(),
            ..Self::default()
        }
    }

    /// A device matches when it advertises the service or its name starts
    /// with one of the prefixes
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        services.contains(&self.service_uuid)
            || name.is_some_and(|n| self.name_prefixes.iter().any(|p| n.starts_with(p.as_str())))
    }
}

/// Receiver of raw notification frames. The channel closing means the link
/// is gone.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Capability set of the platform BLE stack
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// False when the host has no usable BLE stack. Never fails.
    async fn is_supported(&self) -> bool;

    /// Finds one matching device. May wait on a user chooser.
    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceInfo>;

    /// Connects GATT and discovers the HC03 characteristics. No retries.
    async fn connect_gatt(&self, device: &DeviceInfo) -> Result<()>;

    /// Subscribes to a characteristic. Every call gets its own receiver and
    /// sees every frame in arrival order.
    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationReceiver>;

    async fn write_command(&self, characteristic: Uuid, bytes: &[u8]) -> Result<()>;

    /// Releases the link. Safe to call when not connected.
    async fn disconnect(&self) -> Result<()>;
}
