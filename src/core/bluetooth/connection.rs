//! Bluetooth connection handling for the HC03 device
//! This module implements the transport adapter on top of `bluest`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, trace, warn};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::DeviceConfig;
use crate::core::bluetooth::constants::{
    UUID_HC03_NOTIFY_CHAR, UUID_HC03_SERVICE, UUID_HC03_WRITE_CHAR,
};
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::transport::{DeviceFilter, NotificationReceiver, TransportAdapter};
use crate::core::bluetooth::types::DeviceInfo;
use crate::error::{DeviceError, Result};

type Subscribers = Arc<std::sync::Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>>;

/// The characteristics of one live link
struct Link {
    device: Device,
    write_char: Characteristic,
    subscribers: Subscribers,
    cancel_token: CancellationToken,
}

/// Transport adapter backed by the host Bluetooth stack
pub struct BluestTransport {
    adapter: Option<Adapter>,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    link: Mutex<Option<Link>>,
    scan_timeout: Duration,
    connect_timeout: Duration,
}

impl BluestTransport {
    /// Opens the default adapter. A host without one yields a transport
    /// whose `is_supported()` is false.
    pub async fn new(config: &DeviceConfig) -> Self {
        let adapter = Adapter::default().await;
        match &adapter {
            Some(_) => info!("Bluetooth adapter found."),
            None => warn!("No Bluetooth adapter found"),
        }
        Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            link: Mutex::new(None),
            scan_timeout: Duration::from_secs(config.scan_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter.as_ref().ok_or(DeviceError::BluetoothUnsupported)
    }

    /// Connects and discovers the HC03 characteristics
    async fn try_connect(&self, adapter: &Adapter, device: &Device) -> Result<(Characteristic, Characteristic)> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Device details - ID: {}, Name: {:?}", device.id(), name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", device.id());
            adapter.connect_device(device).await?;
        }

        info!("Connection successful, discovering services...");
        let services = device.services().await?;
        let service = services
            .iter()
            .find(|s| s.uuid() == UUID_HC03_SERVICE)
            .ok_or_else(|| {
                for service in &services {
                    info!("Available service: {}", service.uuid());
                }
                DeviceError::Transport(format!("HC03 service not found: {}", UUID_HC03_SERVICE))
            })?
            .clone();

        let mut notify_char = None;
        let mut write_char = None;
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid();
            if uuid == UUID_HC03_NOTIFY_CHAR {
                info!("Found notification characteristic: {}", uuid);
                notify_char = Some(characteristic);
            } else if uuid == UUID_HC03_WRITE_CHAR {
                info!("Found write characteristic: {}", uuid);
                write_char = Some(characteristic);
            }
        }

        let notify_char = notify_char.ok_or_else(|| {
            DeviceError::Transport(format!("Notification characteristic not found: {}", UUID_HC03_NOTIFY_CHAR))
        })?;
        let write_char = write_char.ok_or_else(|| {
            DeviceError::Transport(format!("Write characteristic not found: {}", UUID_HC03_WRITE_CHAR))
        })?;
        Ok((notify_char, write_char))
    }

    /// Reads the notification stream and copies each frame to every live
    /// subscriber. Subscribers are dropped when the stream ends so their
    /// receivers observe the link loss.
    fn spawn_forwarder(notify_char: Characteristic, subscribers: Subscribers, cancel_token: CancellationToken) {
        tokio::spawn(async move {
            info!("Listening for HC03 notifications...");
            match notify_char.notify().await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        next = stream.next() => match next {
                            Some(Ok(value)) => {
                                trace!("Received frame: {:02X?}", value);
                                subscribers
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .retain(|tx| tx.send(value.clone()).is_ok());
                            }
                            Some(Err(e)) => {
                                error!("Error in notification stream: {}", e);
                                break;
                            }
                            None => break,
                        },
                        _ = cancel_token.cancelled() => {
                            debug!("Notification forwarder cancelled");
                            break;
                        }
                    }
                },
                Err(e) => error!("Failed to subscribe to notifications: {}", e),
            }
            subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();
            info!("Notification stream ended");
        });
    }
}

#[async_trait]
impl TransportAdapter for BluestTransport {
    async fn is_supported(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.is_available().await.unwrap_or(false),
            None => false,
        }
    }

    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceInfo> {
        let adapter = self.adapter()?.clone();
        let scanner = BluetoothScanner::new(adapter, self.devices.clone());
        scanner.find_device(filter, self.scan_timeout).await
    }

    async fn connect_gatt(&self, info: &DeviceInfo) -> Result<()> {
        let adapter = self.adapter()?;
        let device = self
            .devices
            .lock()
            .await
            .get(&info.id)
            .cloned()
            .ok_or(DeviceError::DeviceNotFound)?;

        let (notify_char, write_char) = tokio::time::timeout(self.connect_timeout, self.try_connect(adapter, &device))
            .await
            .map_err(|_| DeviceError::ConnectionTimeout {
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })??;

        let subscribers: Subscribers = Arc::default();
        let cancel_token = CancellationToken::new();
        Self::spawn_forwarder(notify_char, subscribers.clone(), cancel_token.clone());

        *self.link.lock().await = Some(Link {
            device,
            write_char,
            subscribers,
            cancel_token,
        });
        info!("Connection and setup process completed successfully");
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationReceiver> {
        if characteristic != UUID_HC03_NOTIFY_CHAR {
            return Err(DeviceError::Transport(format!(
                "characteristic {} does not notify",
                characteristic
            )));
        }
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(DeviceError::NotConnected)?;
        let (tx, rx) = mpsc::unbounded_channel();
        link.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Ok(rx)
    }

    async fn write_command(&self, characteristic: Uuid, bytes: &[u8]) -> Result<()> {
        if characteristic != UUID_HC03_WRITE_CHAR {
            return Err(DeviceError::WriteFailed(format!(
                "characteristic {} is not writable",
                characteristic
            )));
        }
        let write_char = {
            let link = self.link.lock().await;
            link.as_ref().ok_or(DeviceError::NotConnected)?.write_char.clone()
        };
        write_char
            .write(bytes)
            .await
            .map_err(|e| DeviceError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(link) = self.link.lock().await.take() else {
            debug!("No device connected");
            return Ok(());
        };
        link.cancel_token.cancel();
        link.subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();

        if link.device.is_connected().await {
            info!("Disconnecting from device {}", link.device.id());
            self.adapter()?.disconnect_device(&link.device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", link.device.id());
        }
        Ok(())
    }
}
