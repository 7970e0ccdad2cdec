//! Application state management
//! This module wires the device manager, the event bus and the persistence
//! sink together.

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

use crate::config::AppConfig;
use crate::core::bluetooth::{BluestTransport, DeviceManager, TransportAdapter};
use crate::core::events::EventBus;
use crate::core::persistence::{HistoryClient, HttpVitalSignsApi, PersistenceSink, VitalSignsApi};

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    pub bus: Arc<EventBus>,
    /// The device session
    pub manager: DeviceManager,
    /// Present when a patient is configured and persistence is enabled
    pub sink: Option<Arc<PersistenceSink>>,
}

impl AppState {
    /// State over the host Bluetooth stack and the configured HTTP backend
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing Bluetooth transport...");
        let transport: Arc<dyn TransportAdapter> = Arc::new(BluestTransport::new(&config.device).await);
        Self::with_transport(config, transport)
    }

    /// State over any transport, posting to the configured HTTP backend
    pub fn with_transport(config: AppConfig, transport: Arc<dyn TransportAdapter>) -> Result<Self> {
        let api: Option<Arc<dyn VitalSignsApi>> = if config.persistence.is_active() {
            Some(Arc::new(HttpVitalSignsApi::new(&config.persistence)?))
        } else {
            None
        };
        Ok(Self::with_backend(config, transport, api))
    }

    /// State over explicit transport and backend
    pub fn with_backend(
        config: AppConfig,
        transport: Arc<dyn TransportAdapter>,
        api: Option<Arc<dyn VitalSignsApi>>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let manager = DeviceManager::new(transport, bus.clone(), &config.device);

        let sink = match api {
            Some(api) if config.persistence.is_active() => {
                let history = Arc::new(HistoryClient::new(api.clone(), config.persistence.patient_id.clone()));
                let sink = Arc::new(PersistenceSink::new(api, history, &config.persistence));
                sink.attach(&bus);
                Some(sink)
            }
            _ => {
                warn!("Persistence disabled: readings stay in memory only");
                None
            }
        };

        Self {
            config,
            bus,
            manager,
            sink,
        }
    }
}
