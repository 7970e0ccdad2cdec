//! End-to-end session behaviour over the simulated transport

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use hc03_device_bridge::config::{AppConfig, DeviceConfig};
use hc03_device_bridge::core::bluetooth::{
    ConnectionState, DeviceFilter, DeviceInfo, DeviceManager, NotificationReceiver, SimulatedTransport,
    TransportAdapter,
};
use hc03_device_bridge::core::events::{DeviceEvent, EventBus, EventName};
use hc03_device_bridge::core::persistence::{InMemoryVitalSignsApi, VitalSignsApi};
use hc03_device_bridge::core::protocol::{PaperState, encode_start_command, notify};
use hc03_device_bridge::{DeviceError, Result};
use hc03_device_bridge::core::readings::{
    ChargingState, DecodedReading, GlucoseParams, MeasurementParams, MeasurementType,
};
use hc03_device_bridge::core::session::{StopReason, SubState};
use hc03_device_bridge::error::ErrorKind;
use hc03_device_bridge::state::AppState;

struct Harness {
    sim: SimulatedTransport,
    bus: Arc<EventBus>,
    manager: DeviceManager,
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl Harness {
    fn new() -> Self {
        let sim = SimulatedTransport::new();
        let bus = Arc::new(EventBus::new());
        let manager = DeviceManager::new(Arc::new(sim.clone()), bus.clone(), &DeviceConfig::default());
        let events = record_all(&bus);
        Self {
            sim,
            bus,
            manager,
            events,
        }
    }

    fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn count(&self, name: EventName) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }

    fn states(&self) -> Vec<ConnectionState> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::ConnectionStateChanged { current, .. } => Some(*current),
                _ => None,
            })
            .collect()
    }

    fn stops(&self) -> Vec<(MeasurementType, StopReason)> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::MeasurementStopped { measurement, reason } => Some((*measurement, *reason)),
                _ => None,
            })
            .collect()
    }

    fn errors(&self) -> Vec<ErrorKind> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::BluetoothError(err) => Some(err.kind),
                _ => None,
            })
            .collect()
    }

    /// Pushes a frame and lets the notification pump process it
    async fn push(&self, frame: Vec<u8>) {
        self.sim.push_frame(frame);
        settle().await;
    }
}

fn record_all(bus: &EventBus) -> Arc<Mutex<Vec<DeviceEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for name in EventName::ALL {
        let events = events.clone();
        bus.on(name, move |event| {
            events.lock().unwrap().push(event.clone());
            Ok(())
        });
    }
    events
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn glucose_c16() -> MeasurementParams {
    GlucoseParams::parse("BENE_CHECK", "C16", None).unwrap().into()
}

#[tokio::test]
async fn test_connect_passes_through_connecting() {
    let h = Harness::new();
    let device = h.manager.connect().await.unwrap();

    assert_eq!(device.name, "HC03-SIM");
    assert_eq!(
        h.states(),
        vec![ConnectionState::Scanning, ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert_eq!(h.count(EventName::Connected), 1);
    assert_eq!(h.manager.connection().device_id.as_deref(), Some("sim-hc03-0001"));

    h.manager.disconnect().await;
    h.manager.connect().await.unwrap();
    let states = h.states();
    for (i, state) in states.iter().enumerate() {
        if *state == ConnectionState::Connected {
            assert_eq!(states[i - 1], ConnectionState::Connecting);
        }
    }
}

#[tokio::test]
async fn test_connect_when_connected_returns_device() {
    let h = Harness::new();
    let first = h.manager.connect().await.unwrap();
    h.clear();

    let second = h.manager.connect().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.sim.request_count(), 1);
    assert!(h.events().is_empty());
}

#[tokio::test]
async fn test_double_start_keeps_one_session() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();

    for measurement in [
        MeasurementType::Ecg,
        MeasurementType::BloodOxygen,
        MeasurementType::BloodPressure,
        MeasurementType::Temperature,
    ] {
        h.manager.start_measurement(measurement, MeasurementParams::default()).await.unwrap();
        h.manager.start_measurement(measurement, MeasurementParams::default()).await.unwrap();
    }

    assert_eq!(
        h.manager.active_measurements(),
        vec![
            MeasurementType::Ecg,
            MeasurementType::BloodOxygen,
            MeasurementType::BloodPressure,
            MeasurementType::Temperature,
        ]
    );
    assert!(
        h.stops()
            .iter()
            .all(|(_, reason)| *reason == StopReason::Restarted)
    );
    assert_eq!(h.stops().len(), 4);
}

#[tokio::test]
async fn test_blood_pressure_result_reaches_bus_once() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.manager
        .start_measurement(MeasurementType::BloodPressure, MeasurementParams::default())
        .await
        .unwrap();

    h.push(notify::blood_pressure(120, 80, 72, 100, 0)).await;

    let Some(DecodedReading::BloodPressure(bp)) = h.bus.latest(MeasurementType::BloodPressure) else {
        panic!("no blood pressure reading");
    };
    assert_eq!(bp.systolic, Some(120));
    assert_eq!(bp.diastolic, Some(80));
    assert_eq!(bp.heart_rate, Some(72));
    assert_eq!(h.count(EventName::BloodPressureData), 1);
    assert_eq!(h.stops(), vec![(MeasurementType::BloodPressure, StopReason::Completed)]);
    assert!(h.manager.active_measurements().is_empty());

    // Nothing more once the session has completed
    h.push(notify::blood_pressure(130, 85, 70, 100, 0)).await;
    assert_eq!(h.count(EventName::BloodPressureData), 1);
}

#[tokio::test]
async fn test_glucose_walkthrough() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.manager
        .start_measurement(MeasurementType::BloodGlucose, glucose_c16())
        .await
        .unwrap();
    assert_eq!(h.manager.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForStrip);

    h.push(notify::paper_state(PaperState::StripDetected)).await;
    assert_eq!(h.manager.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForBlood);

    h.push(notify::paper_state(PaperState::BloodDetected)).await;
    assert_eq!(h.manager.sub_state(MeasurementType::BloodGlucose), SubState::Analyzing);

    h.push(notify::glucose_tenths(56)).await;
    assert_eq!(h.manager.sub_state(MeasurementType::BloodGlucose), SubState::Result);
    let Some(DecodedReading::BloodGlucose(bg)) = h.bus.latest(MeasurementType::BloodGlucose) else {
        panic!("no glucose reading");
    };
    assert!((bg.mmol_per_l.unwrap() - 5.6).abs() < 1e-4);
    assert_eq!(h.stops(), vec![(MeasurementType::BloodGlucose, StopReason::Completed)]);

    // Result holds until the next start
    h.push(notify::paper_state(PaperState::StripDetected)).await;
    assert_eq!(h.manager.sub_state(MeasurementType::BloodGlucose), SubState::Result);

    h.clear();
    h.manager
        .start_measurement(MeasurementType::BloodGlucose, glucose_c16())
        .await
        .unwrap();
    let statuses: Vec<SubState> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::GlucoseStatus { sub_state, .. } => Some(*sub_state),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![SubState::Idle, SubState::WaitingForStrip]);
}

#[tokio::test]
async fn test_glucose_ignores_out_of_order_events() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.manager
        .start_measurement(MeasurementType::BloodGlucose, glucose_c16())
        .await
        .unwrap();

    h.push(notify::paper_state(PaperState::BloodDetected)).await;
    h.push(notify::glucose_tenths(70)).await;
    assert_eq!(h.manager.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForStrip);
    assert!(h.bus.latest(MeasurementType::BloodGlucose).is_none());

    h.push(notify::paper_state(PaperState::StripDetected)).await;
    h.push(notify::paper_state(PaperState::StripDetected)).await;
    assert_eq!(h.manager.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForBlood);
}

#[tokio::test]
async fn test_strip_removed_cancels_glucose() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.manager
        .start_measurement(MeasurementType::BloodGlucose, glucose_c16())
        .await
        .unwrap();
    h.push(notify::paper_state(PaperState::StripDetected)).await;
    h.push(notify::paper_state(PaperState::StripRemoved)).await;

    assert_eq!(h.manager.sub_state(MeasurementType::BloodGlucose), SubState::Idle);
    assert_eq!(h.stops(), vec![(MeasurementType::BloodGlucose, StopReason::StripError)]);
}

#[tokio::test]
async fn test_disconnect_cancels_every_session() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.manager.start_measurement(MeasurementType::Ecg, MeasurementParams::default()).await.unwrap();
    h.manager
        .start_measurement(MeasurementType::Temperature, MeasurementParams::default())
        .await
        .unwrap();
    h.sim.clear_written();

    h.manager.disconnect().await;

    assert_eq!(
        h.stops(),
        vec![
            (MeasurementType::Ecg, StopReason::DeviceDisconnected),
            (MeasurementType::Temperature, StopReason::DeviceDisconnected),
        ]
    );
    assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.count(EventName::Disconnected), 1);
    assert_eq!(h.sim.written().len(), 2);
    assert!(!h.sim.is_connected());
    assert!(h.errors().is_empty());

    // A second disconnect is a silent no-op
    h.clear();
    h.manager.disconnect().await;
    assert!(h.events().is_empty());
}

#[tokio::test]
async fn test_start_requires_connection() {
    let h = Harness::new();
    let err = h
        .manager
        .start_measurement(MeasurementType::Ecg, MeasurementParams::default())
        .await
        .unwrap_err();

    assert_eq!(err, DeviceError::NotConnected);
    assert_eq!(h.count(EventName::MeasurementStarted), 0);
    assert!(h.sim.written().is_empty());
}

#[tokio::test]
async fn test_glucose_requires_parameters() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.sim.clear_written();

    let err = h
        .manager
        .start_measurement(MeasurementType::BloodGlucose, MeasurementParams::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert!(h.sim.written().is_empty());
    assert_eq!(h.count(EventName::MeasurementStarted), 0);
}

#[tokio::test]
async fn test_unsupported_host_never_opens_chooser() {
    let h = Harness::new();
    h.sim.set_supported(false);

    let err = h.manager.connect().await.unwrap_err();

    assert_eq!(err, DeviceError::BluetoothUnsupported);
    assert_eq!(h.sim.request_count(), 0);
    assert!(!h.states().contains(&ConnectionState::Scanning));
    assert_eq!(h.errors(), vec![ErrorKind::BluetoothUnsupported]);
    assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_concurrent_connect_is_rejected() {
    let h = Harness::new();
    h.sim.hold_chooser();

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect().await });
    settle().await;
    assert_eq!(h.manager.connection_state(), ConnectionState::Scanning);

    assert_eq!(h.manager.connect().await, Err(DeviceError::AlreadyInProgress));
    assert!(h.errors().is_empty());

    h.sim.release_chooser();
    assert!(pending.await.unwrap().is_ok());
    assert_eq!(h.sim.request_count(), 1);
    assert!(h.manager.is_connected());
}

#[tokio::test]
async fn test_disconnect_while_choosing_cancels_connect() {
    let h = Harness::new();
    h.sim.hold_chooser();

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect().await });
    settle().await;
    assert_eq!(h.manager.connection_state(), ConnectionState::Scanning);

    h.manager.disconnect().await;
    h.sim.release_chooser();

    assert_eq!(pending.await.unwrap(), Err(DeviceError::UserCancelled));
    assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
    assert!(!h.sim.is_connected());
    assert!(!h.errors().contains(&ErrorKind::Transport));
    assert!(!h.states().contains(&ConnectionState::Connected));
}

#[tokio::test]
async fn test_chooser_failures_return_to_disconnected() {
    let h = Harness::new();

    h.sim.fail_next_request(DeviceError::UserCancelled);
    assert_eq!(h.manager.connect().await, Err(DeviceError::UserCancelled));
    assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.manager.connection().last_error, Some(DeviceError::UserCancelled));

    h.sim.set_device(None);
    assert_eq!(h.manager.connect().await, Err(DeviceError::DeviceNotFound));

    assert_eq!(h.errors(), vec![ErrorKind::UserCancelled, ErrorKind::DeviceNotFound]);
    assert!(!h.states().contains(&ConnectionState::Connected));
}

#[tokio::test]
async fn test_link_loss_is_reported() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.manager
        .start_measurement(MeasurementType::BloodOxygen, MeasurementParams::default())
        .await
        .unwrap();

    h.sim.drop_link();
    settle().await;

    assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.errors(), vec![ErrorKind::ConnectionLost]);
    assert_eq!(
        h.stops(),
        vec![(MeasurementType::BloodOxygen, StopReason::DeviceDisconnected)]
    );
    assert!(h.manager.device().is_none());

    // The manager can connect again afterwards
    h.manager.connect().await.unwrap();
    assert!(h.manager.is_connected());
}

#[tokio::test]
async fn test_latest_reading_survives_reconnect() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.manager
        .start_measurement(MeasurementType::Temperature, MeasurementParams::default())
        .await
        .unwrap();
    h.push(notify::temperature_tenths(372)).await;

    h.manager.disconnect().await;
    h.manager.connect().await.unwrap();

    let Some(DecodedReading::Temperature(t)) = h.bus.latest(MeasurementType::Temperature) else {
        panic!("temperature reading lost");
    };
    assert!((t.celsius.unwrap() - 37.2).abs() < 1e-4);
}

#[tokio::test]
async fn test_battery_frames_update_status() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.push(notify::battery(64, ChargingState::Charging)).await;

    let battery = h.manager.battery().unwrap();
    assert_eq!(battery.level, 64);
    assert_eq!(battery.charging_state, ChargingState::Charging);
    assert_eq!(h.bus.latest_battery(), Some(battery));
    assert_eq!(h.count(EventName::BatteryData), 1);
}

#[tokio::test]
async fn test_write_failure_is_reported() {
    let h = Harness::new();
    h.manager.connect().await.unwrap();
    h.sim.set_fail_writes(true);

    let err = h
        .manager
        .start_measurement(MeasurementType::Ecg, MeasurementParams::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WriteFailed);
    assert_eq!(h.errors(), vec![ErrorKind::WriteFailed]);
    assert_eq!(h.count(EventName::MeasurementStarted), 1);
    assert_eq!(h.stops(), vec![(MeasurementType::Ecg, StopReason::CommandFailed)]);
    assert!(h.manager.active_measurements().is_empty());
}

/// Answers the glucose start command with a strip detection before the
/// write itself completes, the way a fast device can.
struct EagerDevice {
    sim: SimulatedTransport,
}

#[async_trait]
impl TransportAdapter for EagerDevice {
    async fn is_supported(&self) -> bool {
        self.sim.is_supported().await
    }

    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceInfo> {
        self.sim.request_device(filter).await
    }

    async fn connect_gatt(&self, device: &DeviceInfo) -> Result<()> {
        self.sim.connect_gatt(device).await
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationReceiver> {
        self.sim.subscribe(characteristic).await
    }

    async fn write_command(&self, characteristic: Uuid, bytes: &[u8]) -> Result<()> {
        self.sim.write_command(characteristic, bytes).await?;
        let glucose_start = encode_start_command(MeasurementType::BloodGlucose, &glucose_c16())?;
        if bytes == glucose_start.as_slice() {
            self.sim.push_frame(notify::paper_state(PaperState::StripDetected));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.sim.disconnect().await
    }
}

#[tokio::test]
async fn test_reply_during_start_write_is_kept() {
    let sim = SimulatedTransport::new();
    let bus = Arc::new(EventBus::new());
    let transport = Arc::new(EagerDevice { sim: sim.clone() });
    let manager = DeviceManager::new(transport, bus.clone(), &DeviceConfig::default());
    let events = record_all(&bus);

    manager.connect().await.unwrap();
    manager
        .start_measurement(MeasurementType::BloodGlucose, glucose_c16())
        .await
        .unwrap();
    settle().await;

    assert_eq!(manager.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForBlood);
    let statuses: Vec<SubState> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::GlucoseStatus { sub_state, .. } => Some(*sub_state),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.last(), Some(&SubState::WaitingForBlood));
}

#[tokio::test]
async fn test_auto_respond_streams_ecg() {
    let sim = SimulatedTransport::new().with_auto_respond();
    let bus = Arc::new(EventBus::new());
    let manager = DeviceManager::new(Arc::new(sim.clone()), bus.clone(), &DeviceConfig::default());
    manager.connect().await.unwrap();
    manager.start_measurement(MeasurementType::Ecg, MeasurementParams::default()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let Some(DecodedReading::Ecg(ecg)) = bus.latest(MeasurementType::Ecg) else {
        panic!("no ecg reading");
    };
    assert!(!ecg.waveform.is_empty());
    assert!(ecg.heart_rate.is_some());
    assert_eq!(bus.latest_battery().map(|b| b.level), Some(87));
    manager.disconnect().await;
}

#[tokio::test]
async fn test_readings_are_persisted() {
    let mut config = AppConfig::default();
    config.persistence.patient_id = "patient-7".to_string();
    config.device.battery_poll_interval_secs = 0;

    let sim = SimulatedTransport::new();
    let api = Arc::new(InMemoryVitalSignsApi::new());
    let backend: Arc<dyn VitalSignsApi> = api.clone();
    let app = AppState::with_backend(config, Arc::new(sim.clone()), Some(backend));
    assert!(app.sink.is_some());

    app.manager.connect().await.unwrap();
    app.manager
        .start_measurement(MeasurementType::BloodPressure, MeasurementParams::default())
        .await
        .unwrap();
    // In-progress frames are live only
    sim.push_frame(notify::blood_pressure(0, 0, 0, 40, 120));
    settle().await;
    assert!(api.records().is_empty());

    sim.push_frame(notify::blood_pressure(120, 80, 72, 100, 0));
    settle().await;

    let records = api.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].patient_id, "patient-7");
    assert_eq!(records[0].blood_pressure_systolic, Some(120));
    assert_eq!(records[0].blood_pressure_diastolic, Some(80));
    assert_eq!(records[0].heart_rate, Some(72));
    assert_eq!(records[0].temperature, None);
}

#[tokio::test]
async fn test_waveform_frames_do_not_repost_heart_rate() {
    let mut config = AppConfig::default();
    config.persistence.patient_id = "patient-7".to_string();
    config.persistence.stream_throttle_ms = 0;
    config.device.battery_poll_interval_secs = 0;

    let sim = SimulatedTransport::new();
    let api = Arc::new(InMemoryVitalSignsApi::new());
    let backend: Arc<dyn VitalSignsApi> = api.clone();
    let app = AppState::with_backend(config, Arc::new(sim.clone()), Some(backend));

    app.manager.connect().await.unwrap();
    app.manager
        .start_measurement(MeasurementType::Ecg, MeasurementParams::default())
        .await
        .unwrap();
    sim.push_frame(notify::ecg_heart_rate(72));
    for i in 0..5 {
        for frame in notify::ecg_wave(&[i, i + 1, i + 2]) {
            sim.push_frame(frame);
        }
    }
    settle().await;

    let records = api.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].heart_rate, Some(72));
    // The live reading still carries the merged heart rate
    let Some(DecodedReading::Ecg(ecg)) = app.bus.latest(MeasurementType::Ecg) else {
        panic!("no ecg reading");
    };
    assert_eq!(ecg.heart_rate, Some(72));
}

#[tokio::test]
async fn test_failed_post_keeps_reading_live() {
    let mut config = AppConfig::default();
    config.persistence.patient_id = "patient-7".to_string();

    let sim = SimulatedTransport::new();
    let api = Arc::new(InMemoryVitalSignsApi::new());
    api.set_fail_posts(true);
    let backend: Arc<dyn VitalSignsApi> = api.clone();
    let app = AppState::with_backend(config, Arc::new(sim.clone()), Some(backend));

    app.manager.connect().await.unwrap();
    app.manager
        .start_measurement(MeasurementType::Temperature, MeasurementParams::default())
        .await
        .unwrap();
    sim.push_frame(notify::temperature_tenths(366));
    settle().await;

    assert!(api.records().is_empty());
    assert!(app.bus.latest(MeasurementType::Temperature).is_some());
    assert!(app.manager.is_connected());
}
