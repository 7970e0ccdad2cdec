//! Device manager for the HC03 bridge
//! This module provides the public contract of the device session: connect,
//! disconnect, start and stop measurements.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::DeviceConfig;
use crate::core::bluetooth::commands::{CommandExecutor, DeviceCommand, TransportCommandSender};
use crate::core::bluetooth::constants::UUID_HC03_NOTIFY_CHAR;
use crate::core::bluetooth::notification::{FrameSink, NotificationHandler};
use crate::core::bluetooth::transport::{DeviceFilter, TransportAdapter};
use crate::core::bluetooth::types::{ConnectionState, DeviceConnection, DeviceInfo};
use crate::core::events::{DeviceEvent, EventBus};
use crate::core::protocol::decode_frame;
use crate::core::readings::{BatteryStatus, MeasurementParams, MeasurementType};
use crate::core::session::{SessionState, StopReason, SubState};
use crate::error::{DeviceError, Result};

struct ManagerInner {
    transport: Arc<dyn TransportAdapter>,
    bus: Arc<EventBus>,
    state: Mutex<SessionState>,
    executor: CommandExecutor<TransportCommandSender>,
    filter: DeviceFilter,
    battery_poll_interval: Duration,
    device: Mutex<Option<DeviceInfo>>,
    battery_poll: Mutex<Option<CancellationToken>>,
    /// Serialises start/stop so each type's check-then-write is atomic
    measurement_ops: tokio::sync::Mutex<()>,
}

impl ManagerInner {
    /// The state lock is never held across an await or while emitting.
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_battery_poll(&self) {
        if let Some(token) = self.battery_poll.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
    }

    fn report(&self, err: &DeviceError) {
        error!("{} ({})", err, err.error_code());
        self.bus.emit(&DeviceEvent::error(err));
    }
}

#[async_trait]
impl FrameSink for ManagerInner {
    async fn on_frame(&self, generation: u64, bytes: Vec<u8>) {
        let events = {
            let mut state = self.state();
            if state.generation() != generation {
                debug!("Dropping frame from stale link {}", generation);
                return;
            }
            state.apply_frame(decode_frame(&bytes))
        };
        self.bus.emit_all(events);
    }

    async fn on_link_closed(&self, generation: u64) {
        let events = {
            let mut state = self.state();
            if state.generation() != generation || !state.connection().is_connected() {
                return;
            }
            warn!("Connection to the device was lost");
            state.drop_link(Some(DeviceError::ConnectionLost))
        };
        self.stop_battery_poll();
        self.device.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.bus.emit_all(events);
        if let Err(e) = self.transport.disconnect().await {
            debug!("Transport cleanup after link loss failed: {}", e);
        }
    }
}

/// Owns the device link and every measurement session
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

impl DeviceManager {
    /// Creates a new DeviceManager over any transport
    pub fn new(transport: Arc<dyn TransportAdapter>, bus: Arc<EventBus>, config: &DeviceConfig) -> Self {
        let executor = CommandExecutor::new(TransportCommandSender::new(transport.clone()));
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                bus,
                state: Mutex::new(SessionState::new(config.ecg_wave_window, config.spo2_wave_window)),
                executor,
                filter: DeviceFilter::with_prefixes(&config.name_prefixes),
                battery_poll_interval: Duration::from_secs(config.battery_poll_interval_secs),
                device: Mutex::new(None),
                battery_poll: Mutex::new(None),
                measurement_ops: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Scans, connects and subscribes. Returns the connected device.
    pub async fn connect(&self) -> Result<DeviceInfo> {
        let inner = &self.inner;
        {
            let state = inner.state();
            match state.connection_state() {
                ConnectionState::Connected => {
                    if let Some(device) = inner.device.lock().unwrap_or_else(PoisonError::into_inner).clone() {
                        info!("Device already connected.");
                        return Ok(device);
                    }
                }
                s if s.is_busy() => return Err(DeviceError::AlreadyInProgress),
                _ => {}
            }
        }

        if !inner.transport.is_supported().await {
            let err = DeviceError::BluetoothUnsupported;
            error!("{} ({})", err, err.error_code());
            let events = inner.state().fail_connect(&err);
            inner.bus.emit_all(events);
            return Err(err);
        }

        let events = inner.state().begin_scan()?;
        inner.bus.emit_all(events);

        match self.establish().await {
            Ok(device) => {
                info!("Device successfully connected: {} ({})", device.name, device.id);
                if let Err(e) = inner.executor.query_battery().await {
                    warn!("Initial battery query failed: {}", e);
                }
                self.start_battery_poll();
                Ok(device)
            }
            Err(err) => {
                let events = inner.state().fail_connect(&err);
                error!("Connect failed: {} ({})", err, err.error_code());
                inner.bus.emit_all(events);
                if let Err(e) = inner.transport.disconnect().await {
                    debug!("Transport cleanup after failed connect: {}", e);
                }
                Err(err)
            }
        }
    }

    async fn establish(&self) -> Result<DeviceInfo> {
        let inner = &self.inner;
        let device = inner.transport.request_device(&inner.filter).await?;

        let events = inner.state().begin_connecting(&device)?;
        inner.bus.emit_all(events);

        inner.transport.connect_gatt(&device).await?;
        let receiver = inner.transport.subscribe(UUID_HC03_NOTIFY_CHAR).await?;

        let (events, generation) = {
            let mut state = inner.state();
            let events = state.mark_connected()?;
            (events, state.generation())
        };
        *inner.device.lock().unwrap_or_else(PoisonError::into_inner) = Some(device.clone());

        let sink: Arc<dyn FrameSink> = inner.clone();
        NotificationHandler::new(generation, sink).spawn(receiver);

        inner.bus.emit_all(events);
        Ok(device)
    }

    fn start_battery_poll(&self) {
        let interval = self.inner.battery_poll_interval;
        if interval.is_zero() {
            return;
        }
        let token = CancellationToken::new();
        if let Some(previous) = self
            .inner
            .battery_poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let executor = self.inner.executor.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; the connect already queried.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = executor.query_battery().await {
                            warn!("Battery poll failed: {}", e);
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            debug!("Battery poll stopped");
        });
        info!("Battery poll started with interval of {} seconds", interval.as_secs());
    }

    /// Cancels every measurement and releases the link. Succeeds even when
    /// nothing is connected.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let _ops = inner.measurement_ops.lock().await;
        inner.stop_battery_poll();

        let active = {
            let state = inner.state();
            if state.connection().is_connected() {
                state.active_measurements()
            } else {
                Vec::new()
            }
        };
        for measurement in active {
            if let Err(e) = inner.executor.stop_measurement(measurement).await {
                debug!("Stop command for {} on disconnect failed: {}", measurement, e);
            }
        }

        let events = inner.state().drop_link(None);
        inner.device.lock().unwrap_or_else(PoisonError::into_inner).take();
        inner.bus.emit_all(events);

        if let Err(e) = inner.transport.disconnect().await {
            warn!("Transport disconnect failed: {}", e);
        }
    }

    /// Starts a measurement, replacing an active one of the same type.
    pub async fn start_measurement(&self, measurement: MeasurementType, params: MeasurementParams) -> Result<()> {
        let inner = &self.inner;
        let _ops = inner.measurement_ops.lock().await;

        inner.state().ensure_connected()?;
        // Reject bad parameters before touching the device
        DeviceCommand::Start(measurement, params).to_bytes()?;

        let restarted = inner.state().cancel_measurement(measurement, StopReason::Restarted);
        if !restarted.is_empty() {
            inner.bus.emit_all(restarted);
            if let Err(e) = inner.executor.stop_measurement(measurement).await {
                warn!("Stop before restart of {} failed: {}", measurement, e);
            }
        }

        // The session exists before the write so replies sent while the
        // write is pending are not dropped.
        let events = {
            let mut state = inner.state();
            state.ensure_connected()?;
            state.begin_measurement(measurement, &params)
        };
        inner.bus.emit_all(events);

        if let Err(err) = inner.executor.start_measurement(measurement, params).await {
            let rollback = inner.state().cancel_measurement(measurement, StopReason::CommandFailed);
            inner.bus.emit_all(rollback);
            inner.report(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Stops a measurement. No-op when none of that type is active.
    pub async fn stop_measurement(&self, measurement: MeasurementType) -> Result<()> {
        let inner = &self.inner;
        let _ops = inner.measurement_ops.lock().await;

        let events = inner.state().cancel_measurement(measurement, StopReason::UserRequested);
        if events.is_empty() {
            debug!("No active {} measurement to stop", measurement);
            return Ok(());
        }
        inner.bus.emit_all(events);

        if let Err(err) = inner.executor.stop_measurement(measurement).await {
            inner.report(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Asks the device for a battery frame; the answer arrives as `batteryData`
    pub async fn query_battery(&self) -> Result<()> {
        self.inner.state().ensure_connected()?;
        self.inner.executor.query_battery().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state().connection_state()
    }

    pub fn connection(&self) -> DeviceConnection {
        self.inner.state().connection().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().connection().is_connected()
    }

    /// The connected device, if any
    pub fn device(&self) -> Option<DeviceInfo> {
        self.inner.device.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sub_state(&self, measurement: MeasurementType) -> SubState {
        self.inner.state().sub_state(measurement)
    }

    pub fn active_measurements(&self) -> Vec<MeasurementType> {
        self.inner.state().active_measurements()
    }

    pub fn battery(&self) -> Option<BatteryStatus> {
        self.inner.state().battery()
    }
}
