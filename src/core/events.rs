//! Event bus and latest-reading store
//!
//! The session publishes everything it does here; UI code and the
//! persistence sink subscribe by event name. Handlers run synchronously, in
//! registration order, on the publishing task. A failing or panicking
//! handler is logged and does not stop the remaining handlers.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{error, trace};
use serde::Serialize;

use crate::core::bluetooth::ConnectionState;
use crate::core::protocol::PaperState;
use crate::core::readings::{BatteryStatus, DecodedReading, MeasurementType, TimedReading};
use crate::core::session::{StopReason, SubState};
use crate::error::{DeviceError, ErrorKind};

/// The closed set of event names UI consumers subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    ConnectionStateChanged,
    Connected,
    Disconnected,
    BluetoothError,
    EcgData,
    BloodOxygenData,
    BloodPressureData,
    TemperatureData,
    BloodGlucoseData,
    BloodGlucoseStatus,
    BatteryData,
    MeasurementStarted,
    MeasurementStopped,
}

impl EventName {
    pub const ALL: [EventName; 13] = [
        EventName::ConnectionStateChanged,
        EventName::Connected,
        EventName::Disconnected,
        EventName::BluetoothError,
        EventName::EcgData,
        EventName::BloodOxygenData,
        EventName::BloodPressureData,
        EventName::TemperatureData,
        EventName::BloodGlucoseData,
        EventName::BloodGlucoseStatus,
        EventName::BatteryData,
        EventName::MeasurementStarted,
        EventName::MeasurementStopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ConnectionStateChanged => "connectionStateChanged",
            EventName::Connected => "connected",
            EventName::Disconnected => "disconnected",
            EventName::BluetoothError => "bluetoothError",
            EventName::EcgData => "ecgData",
            EventName::BloodOxygenData => "bloodOxygenData",
            EventName::BloodPressureData => "bloodPressureData",
            EventName::TemperatureData => "temperatureData",
            EventName::BloodGlucoseData => "bloodGlucoseData",
            EventName::BloodGlucoseStatus => "bloodGlucoseStatus",
            EventName::BatteryData => "batteryData",
            EventName::MeasurementStarted => "measurementStarted",
            EventName::MeasurementStopped => "measurementStopped",
        }
    }

    /// The data event carrying readings of a measurement type
    pub fn for_reading(measurement: MeasurementType) -> Self {
        match measurement {
            MeasurementType::Ecg => EventName::EcgData,
            MeasurementType::BloodOxygen => EventName::BloodOxygenData,
            MeasurementType::BloodPressure => EventName::BloodPressureData,
            MeasurementType::Temperature => EventName::TemperatureData,
            MeasurementType::BloodGlucose => EventName::BloodGlucoseData,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `bluetoothError` event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothErrorEvent {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    pub recoverable: bool,
}

impl From<&DeviceError> for BluetoothErrorEvent {
    fn from(err: &DeviceError) -> Self {
        Self {
            kind: err.kind(),
            code: err.error_code(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

/// Everything the session publishes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum DeviceEvent {
    #[serde(rename_all = "camelCase")]
    ConnectionStateChanged {
        previous: ConnectionState,
        current: ConnectionState,
        device_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Connected { device_id: String, device_name: String },
    #[serde(rename_all = "camelCase")]
    Disconnected { device_id: Option<String> },
    BluetoothError(BluetoothErrorEvent),
    Reading(TimedReading),
    #[serde(rename_all = "camelCase")]
    GlucoseStatus {
        sub_state: SubState,
        paper_state: Option<PaperState>,
    },
    Battery(BatteryStatus),
    MeasurementStarted { measurement: MeasurementType },
    MeasurementStopped {
        measurement: MeasurementType,
        reason: StopReason,
    },
}

impl DeviceEvent {
    pub fn name(&self) -> EventName {
        match self {
            DeviceEvent::ConnectionStateChanged { .. } => EventName::ConnectionStateChanged,
            DeviceEvent::Connected { .. } => EventName::Connected,
            DeviceEvent::Disconnected { .. } => EventName::Disconnected,
            DeviceEvent::BluetoothError(_) => EventName::BluetoothError,
            DeviceEvent::Reading(timed) => EventName::for_reading(timed.reading.measurement_type()),
            DeviceEvent::GlucoseStatus { .. } => EventName::BloodGlucoseStatus,
            DeviceEvent::Battery(_) => EventName::BatteryData,
            DeviceEvent::MeasurementStarted { .. } => EventName::MeasurementStarted,
            DeviceEvent::MeasurementStopped { .. } => EventName::MeasurementStopped,
        }
    }

    pub fn error(err: &DeviceError) -> Self {
        DeviceEvent::BluetoothError(err.into())
    }
}

/// Handlers report failures as errors; panics are caught as well
pub type EventHandler = Arc<dyn Fn(&DeviceEvent) -> anyhow::Result<()> + Send + Sync>;

/// Returned by [`EventBus::on`], passed back to [`EventBus::off`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Named-event publish/subscribe with a latest-reading cache
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventName, Vec<(HandlerId, EventHandler)>>>,
    next_id: AtomicU64,
    latest: RwLock<HashMap<MeasurementType, TimedReading>>,
    battery: RwLock<Option<BatteryStatus>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event name
    pub fn on<F>(&self, name: EventName, handler: F) -> HandlerId
    where
        F: Fn(&DeviceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler; returns false if it was not registered for `name`
    pub fn off(&self, name: EventName, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        match handlers.get_mut(&name) {
            Some(list) => {
                let before = list.len();
                list.retain(|(handler_id, _)| *handler_id != id);
                list.len() != before
            }
            None => false,
        }
    }

    /// Updates the store, then invokes every handler for the event's name.
    pub fn emit(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::Reading(timed) => {
                self.latest
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(timed.reading.measurement_type(), timed.clone());
            }
            DeviceEvent::Battery(status) => {
                *self.battery.write().unwrap_or_else(PoisonError::into_inner) = Some(*status);
            }
            _ => {}
        }

        let name = event.name();
        // Snapshot so handlers can call on/off without deadlocking.
        let handlers: Vec<(HandlerId, EventHandler)> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
            .unwrap_or_default();

        trace!("Emitting {} to {} handler(s)", name, handlers.len());
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Handler {:?} for {} failed: {}", id, name, e),
                Err(_) => error!("Handler {:?} for {} panicked", id, name),
            }
        }
    }

    pub fn emit_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = DeviceEvent>,
    {
        for event in events {
            self.emit(&event);
        }
    }

    /// Most recent reading of a type. Survives reconnects until overwritten.
    pub fn latest(&self, measurement: MeasurementType) -> Option<DecodedReading> {
        self.latest_timed(measurement).map(|timed| timed.reading)
    }

    pub fn latest_timed(&self, measurement: MeasurementType) -> Option<TimedReading> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&measurement)
            .cloned()
    }

    pub fn latest_battery(&self) -> Option<BatteryStatus> {
        *self.battery.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handler_count(&self, name: EventName) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .map_or(0, Vec::len)
    }
}
