use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, info};
use regex::Regex;
use tokio::sync::Mutex;

use crate::core::bluetooth::transport::DeviceFilter;
use crate::core::bluetooth::types::DeviceInfo;
use crate::error::{DeviceError, Result};

static MAC_ADDRESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok());

/// Finds HC03 devices and remembers the handles it saw
#[derive(Clone)]
pub struct BluetoothScanner {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluetoothScanner {
    pub fn new(adapter: Adapter, devices: Arc<Mutex<HashMap<String, Device>>>) -> Self {
        Self { adapter, devices }
    }

    /// Returns the first matching device: an already connected one if the OS
    /// holds a link, otherwise the first advertisement within `timeout`.
    pub async fn find_device(&self, filter: &DeviceFilter, timeout: Duration) -> Result<DeviceInfo> {
        self.devices.lock().await.clear();

        info!("Checking for connected devices");
        for device in self.adapter.connected_devices().await? {
            let name = device.name().ok();
            if filter.matches(name.as_deref(), &[]) {
                return self.remember(device, None).await;
            }
        }
        info!("No connected HC03 device detected");

        info!("Starting bluetooth scan ({}s)", timeout.as_secs());
        let scan = async {
            let mut scan_stream = self.adapter.scan(&[]).await?;
            while let Some(discovered) = scan_stream.next().await {
                let name = discovered
                    .adv_data
                    .local_name
                    .clone()
                    .or_else(|| discovered.device.name().ok());
                debug!("Found device - Name: {:?}, RSSI: {:?}", name, discovered.rssi);
                if filter.matches(name.as_deref(), &discovered.adv_data.services) {
                    return self.remember(discovered.device, discovered.rssi).await;
                }
            }
            info!("Bluetooth scan stream has ended.");
            Err(DeviceError::DeviceNotFound)
        };

        match tokio::time::timeout(timeout, scan).await {
            Ok(result) => result,
            Err(_) => {
                info!("Scan timed out without a compatible device");
                Err(DeviceError::DeviceNotFound)
            }
        }
    }

    async fn remember(&self, device: Device, rssi: Option<i16>) -> Result<DeviceInfo> {
        let id = device.id().to_string();
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let info = DeviceInfo::new(id.clone(), name)
            .with_address(extract_mac_address(&id))
            .with_rssi(rssi);
        info!(
            "Found HC03 device: Address: {:?}, ID: {}, Name: {}, RSSI: {:?}",
            info.address, info.id, info.name, info.rssi
        );
        self.devices.lock().await.insert(id, device);
        Ok(info)
    }
}

/// Pulls a MAC-style address out of a platform device id
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    MAC_ADDRESS
        .as_ref()?
        .find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}
