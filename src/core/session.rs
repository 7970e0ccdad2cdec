//! Connection aggregate and per-measurement sub-state machine
//!
//! `SessionState` owns the one [`DeviceConnection`] and every
//! [`MeasurementSession`]. It performs no I/O: each transition returns the
//! events it produced and the manager publishes them in order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{ConnectionState, DeviceConnection, DeviceInfo};
use crate::core::events::DeviceEvent;
use crate::core::protocol::{Frame, PaperState};
use crate::core::readings::{
    BatteryStatus, BloodOxygenReading, DecodedReading, EcgReading, GlucoseParams,
    MeasurementParams, MeasurementType, TimedReading,
};
use crate::error::{DeviceError, Result};

/// Where a measurement is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubState {
    #[default]
    Idle,
    /// Streaming or single-shot measurement in progress
    Active,
    WaitingForStrip,
    WaitingForBlood,
    Analyzing,
    /// Terminal for a glucose session
    Result,
}

impl SubState {
    /// Position in the glucose sequence, used to reject regressions
    fn glucose_rank(&self) -> u8 {
        match self {
            SubState::Idle | SubState::Active => 0,
            SubState::WaitingForStrip => 1,
            SubState::WaitingForBlood => 2,
            SubState::Analyzing => 3,
            SubState::Result => 4,
        }
    }
}

/// Why a measurement ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    UserRequested,
    /// A new start of the same type replaced it
    Restarted,
    /// The device delivered its final result
    Completed,
    DeviceDisconnected,
    /// The glucose strip was pulled or the device reported a strip error
    StripError,
    /// The start command could not be written
    CommandFailed,
}

/// One measurement of one type
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSession {
    pub measurement: MeasurementType,
    pub sub_state: SubState,
    pub started_at: DateTime<Utc>,
    pub last_reading: Option<DecodedReading>,
    /// Strip manufacturer, code and period; glucose only
    pub glucose: Option<GlucoseParams>,
}

impl MeasurementSession {
    fn new(measurement: MeasurementType, params: &MeasurementParams) -> Self {
        let sub_state = match measurement {
            MeasurementType::BloodGlucose => SubState::WaitingForStrip,
            _ => SubState::Active,
        };
        Self {
            measurement,
            sub_state,
            started_at: Utc::now(),
            last_reading: None,
            glucose: params.glucose,
        }
    }

    /// Idle and Result sessions no longer accept frames
    pub fn is_active(&self) -> bool {
        !matches!(self.sub_state, SubState::Idle | SubState::Result)
    }
}

/// The single owned device/session aggregate
#[derive(Debug)]
pub struct SessionState {
    connection: DeviceConnection,
    sessions: HashMap<MeasurementType, MeasurementSession>,
    battery: Option<BatteryStatus>,
    /// Bumped on every new link so frames from a previous link are dropped
    generation: u64,
    ecg_wave_window: usize,
    spo2_wave_window: usize,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(
            crate::core::bluetooth::constants::ECG_WAVE_WINDOW,
            crate::core::bluetooth::constants::SPO2_WAVE_WINDOW,
        )
    }
}

impl SessionState {
    pub fn new(ecg_wave_window: usize, spo2_wave_window: usize) -> Self {
        Self {
            connection: DeviceConnection::default(),
            sessions: HashMap::new(),
            battery: None,
            generation: 0,
            ecg_wave_window,
            spo2_wave_window,
        }
    }

    pub fn connection(&self) -> &DeviceConnection {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.connection_state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn battery(&self) -> Option<BatteryStatus> {
        self.battery
    }

    pub fn session(&self, measurement: MeasurementType) -> Option<&MeasurementSession> {
        self.sessions.get(&measurement)
    }

    /// Idle when no session of that type exists
    pub fn sub_state(&self, measurement: MeasurementType) -> SubState {
        self.sessions
            .get(&measurement)
            .map_or(SubState::Idle, |s| s.sub_state)
    }

    pub fn is_active(&self, measurement: MeasurementType) -> bool {
        self.sessions.get(&measurement).is_some_and(MeasurementSession::is_active)
    }

    /// Active measurements in a stable order
    pub fn active_measurements(&self) -> Vec<MeasurementType> {
        MeasurementType::ALL
            .into_iter()
            .filter(|m| self.is_active(*m))
            .collect()
    }

    pub fn ensure_connected(&self) -> Result<()> {
        if self.connection.is_connected() {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }

    fn transition(&mut self, next: ConnectionState) -> Result<DeviceEvent> {
        let previous = self.connection.connection_state;
        if !previous.can_transition_to(next) {
            return Err(DeviceError::Transport(format!(
                "illegal connection transition {} -> {}",
                previous, next
            )));
        }
        info!("Connection state: {} -> {}", previous, next);
        self.connection.connection_state = next;
        Ok(DeviceEvent::ConnectionStateChanged {
            previous,
            current: next,
            device_id: self.connection.device_id.clone(),
        })
    }

    /// Disconnected -> Scanning. Rejects a second attempt while one runs.
    pub fn begin_scan(&mut self) -> Result<Vec<DeviceEvent>> {
        if self.connection.connection_state.is_busy() {
            return Err(DeviceError::AlreadyInProgress);
        }
        self.connection.last_error = None;
        Ok(vec![self.transition(ConnectionState::Scanning)?])
    }

    /// A `disconnect()` during an attempt leaves the state Disconnected;
    /// the attempt then ends as cancelled rather than as a stack failure.
    fn ensure_attempt_live(&self) -> Result<()> {
        if self.connection.connection_state == ConnectionState::Disconnected {
            info!("Connect attempt was cancelled by a disconnect");
            return Err(DeviceError::UserCancelled);
        }
        Ok(())
    }

    /// Scanning -> Connecting, remembering the chosen device
    pub fn begin_connecting(&mut self, device: &DeviceInfo) -> Result<Vec<DeviceEvent>> {
        self.ensure_attempt_live()?;
        self.connection.device_id = Some(device.id.clone());
        self.connection.device_name = Some(device.name.clone());
        Ok(vec![self.transition(ConnectionState::Connecting)?])
    }

    /// Connecting -> Connected. Starts a new link generation.
    pub fn mark_connected(&mut self) -> Result<Vec<DeviceEvent>> {
        self.ensure_attempt_live()?;
        let changed = self.transition(ConnectionState::Connected)?;
        self.generation += 1;
        let connected = DeviceEvent::Connected {
            device_id: self.connection.device_id.clone().unwrap_or_default(),
            device_name: self.connection.device_name.clone().unwrap_or_default(),
        };
        Ok(vec![changed, connected])
    }

    /// A connect attempt failed somewhere between Scanning and Connected
    pub fn fail_connect(&mut self, err: &DeviceError) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        if self.connection.connection_state != ConnectionState::Disconnected {
            if let Ok(event) = self.transition(ConnectionState::Disconnected) {
                events.push(event);
            }
        }
        self.connection.device_id = None;
        self.connection.device_name = None;
        self.connection.last_error = Some(err.clone());
        events.push(DeviceEvent::error(err));
        events
    }

    /// Tears down the link: cancels every session, then reports the
    /// disconnect. Returns no events when already disconnected and idle.
    pub fn drop_link(&mut self, error: Option<DeviceError>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();

        for measurement in MeasurementType::ALL {
            events.extend(self.cancel_measurement(measurement, StopReason::DeviceDisconnected));
        }
        self.sessions.clear();

        if self.connection.connection_state != ConnectionState::Disconnected {
            if let Ok(event) = self.transition(ConnectionState::Disconnected) {
                events.push(event);
            }
            events.push(DeviceEvent::Disconnected {
                device_id: self.connection.device_id.clone(),
            });
            self.generation += 1;
        }

        if let Some(err) = error {
            events.push(DeviceEvent::error(&err));
            self.connection.last_error = Some(err);
        }
        self.connection.device_id = None;
        self.connection.device_name = None;
        events
    }

    /// Creates a fresh session. The caller has already stopped any active
    /// session of the same type.
    pub fn begin_measurement(
        &mut self,
        measurement: MeasurementType,
        params: &MeasurementParams,
    ) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        let session = MeasurementSession::new(measurement, params);

        if measurement == MeasurementType::BloodGlucose {
            // A finished glucose session is reset before the next one starts.
            if self.sub_state(measurement) == SubState::Result {
                events.push(DeviceEvent::GlucoseStatus {
                    sub_state: SubState::Idle,
                    paper_state: None,
                });
            }
        }

        let sub_state = session.sub_state;
        self.sessions.insert(measurement, session);
        info!("Measurement started: {}", measurement);
        events.push(DeviceEvent::MeasurementStarted { measurement });
        if measurement == MeasurementType::BloodGlucose {
            events.push(DeviceEvent::GlucoseStatus {
                sub_state,
                paper_state: None,
            });
        }
        events
    }

    /// Cancels an active session. No-op (no events) if there is none.
    pub fn cancel_measurement(&mut self, measurement: MeasurementType, reason: StopReason) -> Vec<DeviceEvent> {
        if !self.is_active(measurement) {
            return Vec::new();
        }
        self.sessions.remove(&measurement);
        info!("Measurement stopped: {} ({:?})", measurement, reason);

        let mut events = vec![DeviceEvent::MeasurementStopped { measurement, reason }];
        if measurement == MeasurementType::BloodGlucose {
            events.push(DeviceEvent::GlucoseStatus {
                sub_state: SubState::Idle,
                paper_state: None,
            });
        }
        events
    }

    /// Feeds one decoded notification through the sub-state machines
    pub fn apply_frame(&mut self, frame: Frame) -> Vec<DeviceEvent> {
        match frame {
            Frame::Unrecognized => {
                debug!("Ignoring unrecognized frame");
                Vec::new()
            }
            Frame::Battery(status) => {
                self.battery = Some(status);
                vec![DeviceEvent::Battery(status)]
            }
            Frame::PaperState(paper) => self.apply_paper_state(paper),
            Frame::Reading(reading) => self.apply_reading(reading),
        }
    }

    fn apply_paper_state(&mut self, paper: PaperState) -> Vec<DeviceEvent> {
        let current = self.sub_state(MeasurementType::BloodGlucose);
        if !self.is_active(MeasurementType::BloodGlucose) {
            debug!("Paper state {:?} with no active glucose measurement", paper);
            return Vec::new();
        }

        let next = match (paper, current) {
            (PaperState::StripRemoved | PaperState::Error, _) => {
                warn!("Glucose strip failure ({:?}) in {:?}", paper, current);
                let mut events = vec![DeviceEvent::MeasurementStopped {
                    measurement: MeasurementType::BloodGlucose,
                    reason: StopReason::StripError,
                }];
                self.sessions.remove(&MeasurementType::BloodGlucose);
                events.push(DeviceEvent::GlucoseStatus {
                    sub_state: SubState::Idle,
                    paper_state: Some(paper),
                });
                return events;
            }
            (PaperState::StripRequested, SubState::WaitingForStrip) => current,
            (PaperState::StripDetected, SubState::WaitingForStrip) => SubState::WaitingForBlood,
            (PaperState::BloodDetected, SubState::WaitingForBlood) => SubState::Analyzing,
            (PaperState::Testing, SubState::Analyzing) => current,
            _ => {
                warn!("Out-of-order paper state {:?} while {:?}; ignored", paper, current);
                return Vec::new();
            }
        };

        debug_assert!(next.glucose_rank() >= current.glucose_rank());
        if let Some(session) = self.sessions.get_mut(&MeasurementType::BloodGlucose) {
            session.sub_state = next;
        }
        if next != current {
            info!("Glucose: {:?} -> {:?}", current, next);
        }
        vec![DeviceEvent::GlucoseStatus {
            sub_state: next,
            paper_state: Some(paper),
        }]
    }

    fn apply_reading(&mut self, reading: DecodedReading) -> Vec<DeviceEvent> {
        let measurement = reading.measurement_type();
        if !self.is_active(measurement) {
            debug!("Discarding {} reading with no active measurement", measurement);
            return Vec::new();
        }
        if !has_data(&reading) {
            debug!("Discarding {} reading with no data", measurement);
            return Vec::new();
        }

        let device_id = self.connection.device_id.clone();
        let (ecg_window, spo2_window) = (self.ecg_wave_window, self.spo2_wave_window);
        let Some(session) = self.sessions.get_mut(&measurement) else {
            return Vec::new();
        };

        if measurement == MeasurementType::BloodGlucose && session.sub_state != SubState::Analyzing {
            warn!("Out-of-order glucose result while {:?}; ignored", session.sub_state);
            return Vec::new();
        }

        let fresh = reading.carries_vitals();
        let merged = match (reading, session.last_reading.take()) {
            (DecodedReading::Ecg(update), Some(DecodedReading::Ecg(mut current))) => {
                merge_ecg(&mut current, update, ecg_window);
                DecodedReading::Ecg(current)
            }
            (DecodedReading::Ecg(mut update), _) => {
                trim_front(&mut update.waveform, ecg_window);
                DecodedReading::Ecg(update)
            }
            (DecodedReading::BloodOxygen(update), Some(DecodedReading::BloodOxygen(mut current))) => {
                merge_blood_oxygen(&mut current, update, spo2_window);
                DecodedReading::BloodOxygen(current)
            }
            (DecodedReading::BloodOxygen(mut update), _) => {
                trim_front(&mut update.waveform, spo2_window);
                DecodedReading::BloodOxygen(update)
            }
            (DecodedReading::BloodGlucose(mut update), _) => {
                update.period = session.glucose.and_then(|g| g.period);
                DecodedReading::BloodGlucose(update)
            }
            (other, _) => other,
        };

        session.last_reading = Some(merged.clone());
        let mut events = vec![DeviceEvent::Reading(TimedReading {
            timestamp: Utc::now(),
            device_id,
            reading: merged.clone(),
            fresh,
        })];

        match &merged {
            DecodedReading::BloodPressure(bp) if bp.is_complete() => {
                self.sessions.remove(&measurement);
                info!("Blood pressure complete: {:?}/{:?}", bp.systolic, bp.diastolic);
                events.push(DeviceEvent::MeasurementStopped {
                    measurement,
                    reason: StopReason::Completed,
                });
            }
            DecodedReading::BloodGlucose(_) => {
                session.sub_state = SubState::Result;
                info!("Glucose: Analyzing -> Result");
                events.push(DeviceEvent::GlucoseStatus {
                    sub_state: SubState::Result,
                    paper_state: None,
                });
                events.push(DeviceEvent::MeasurementStopped {
                    measurement,
                    reason: StopReason::Completed,
                });
            }
            _ => {}
        }
        events
    }
}

fn has_data(reading: &DecodedReading) -> bool {
    match reading {
        DecodedReading::Ecg(r) => {
            r.heart_rate.is_some()
                || r.rr_interval.is_some()
                || r.hrv.is_some()
                || r.mood_index.is_some()
                || r.respiratory_rate.is_some()
                || r.finger_detected.is_some()
                || !r.waveform.is_empty()
        }
        DecodedReading::BloodOxygen(r) => {
            r.blood_oxygen.is_some()
                || r.heart_rate.is_some()
                || r.finger_detected.is_some()
                || !r.waveform.is_empty()
        }
        DecodedReading::BloodPressure(r) => {
            r.systolic.is_some()
                || r.diastolic.is_some()
                || r.heart_rate.is_some()
                || r.cuff_pressure.is_some()
                || r.progress_percent > 0
        }
        DecodedReading::Temperature(r) => r.celsius.is_some(),
        DecodedReading::BloodGlucose(r) => r.mmol_per_l.is_some(),
    }
}

fn trim_front<T>(samples: &mut Vec<T>, window: usize) {
    if samples.len() > window {
        samples.drain(..samples.len() - window);
    }
}

fn merge_ecg(current: &mut EcgReading, update: EcgReading, window: usize) {
    current.heart_rate = update.heart_rate.or(current.heart_rate);
    current.rr_interval = update.rr_interval.or(current.rr_interval);
    current.hrv = update.hrv.or(current.hrv);
    current.mood_index = update.mood_index.or(current.mood_index);
    current.respiratory_rate = update.respiratory_rate.or(current.respiratory_rate);
    current.finger_detected = update.finger_detected.or(current.finger_detected);
    current.waveform.extend(update.waveform);
    trim_front(&mut current.waveform, window);
}

fn merge_blood_oxygen(current: &mut BloodOxygenReading, update: BloodOxygenReading, window: usize) {
    current.blood_oxygen = update.blood_oxygen.or(current.blood_oxygen);
    current.heart_rate = update.heart_rate.or(current.heart_rate);
    current.finger_detected = update.finger_detected.or(current.finger_detected);
    current.waveform.extend(update.waveform);
    trim_front(&mut current.waveform, window);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{decode_frame, notify};
    use crate::core::readings::{GlucoseManufacturer, GlucosePeriod, StripCode};

    fn connected() -> SessionState {
        let mut state = SessionState::new(8, 4);
        state.begin_scan().unwrap();
        state.begin_connecting(&DeviceInfo::new("dev-1", "HC03-0001")).unwrap();
        state.mark_connected().unwrap();
        state
    }

    fn glucose_params() -> MeasurementParams {
        GlucoseParams::new(GlucoseManufacturer::BeneCheck, StripCode::C16)
            .with_period(GlucosePeriod::BeforeLunch)
            .into()
    }

    fn feed(state: &mut SessionState, bytes: Vec<u8>) -> Vec<DeviceEvent> {
        state.apply_frame(decode_frame(&bytes))
    }

    #[test]
    fn test_connect_sequence_events() {
        let mut state = SessionState::default();
        let scanning = state.begin_scan().unwrap();
        assert!(matches!(
            scanning[0],
            DeviceEvent::ConnectionStateChanged { current: ConnectionState::Scanning, .. }
        ));
        assert_eq!(state.begin_scan(), Err(DeviceError::AlreadyInProgress));

        state.begin_connecting(&DeviceInfo::new("dev-1", "HC03-0001")).unwrap();
        let events = state.mark_connected().unwrap();
        assert_eq!(
            events[1],
            DeviceEvent::Connected { device_id: "dev-1".into(), device_name: "HC03-0001".into() }
        );
        assert_eq!(state.generation(), 1);
    }

    #[test]
    fn test_cannot_skip_connecting() {
        let mut state = SessionState::default();
        assert!(state.mark_connected().is_err());
        state.begin_scan().unwrap();
        assert!(state.mark_connected().is_err());
        assert_eq!(state.connection_state(), ConnectionState::Scanning);
    }

    #[test]
    fn test_disconnect_during_attempt_reads_as_cancelled() {
        let mut state = SessionState::default();
        state.begin_scan().unwrap();
        state.drop_link(None);
        let device = DeviceInfo::new("dev-1", "HC03-0001");
        assert_eq!(state.begin_connecting(&device), Err(DeviceError::UserCancelled));

        state.begin_scan().unwrap();
        state.begin_connecting(&device).unwrap();
        state.drop_link(None);
        assert_eq!(state.mark_connected(), Err(DeviceError::UserCancelled));
        assert_eq!(state.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_fail_connect_resets_and_reports() {
        let mut state = SessionState::default();
        state.begin_scan().unwrap();
        let events = state.fail_connect(&DeviceError::UserCancelled);
        assert_eq!(state.connection_state(), ConnectionState::Disconnected);
        assert_eq!(state.connection().last_error, Some(DeviceError::UserCancelled));
        assert!(matches!(events.last(), Some(DeviceEvent::BluetoothError(_))));
    }

    #[test]
    fn test_glucose_sequence() {
        let mut state = connected();
        state.begin_measurement(MeasurementType::BloodGlucose, &glucose_params());
        assert_eq!(state.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForStrip);

        feed(&mut state, notify::paper_state(PaperState::StripDetected));
        assert_eq!(state.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForBlood);
        feed(&mut state, notify::paper_state(PaperState::BloodDetected));
        assert_eq!(state.sub_state(MeasurementType::BloodGlucose), SubState::Analyzing);

        let events = feed(&mut state, notify::glucose_tenths(56));
        assert_eq!(state.sub_state(MeasurementType::BloodGlucose), SubState::Result);
        match &events[0] {
            DeviceEvent::Reading(timed) => match &timed.reading {
                DecodedReading::BloodGlucose(bg) => {
                    assert_eq!(bg.mmol_per_l, Some(5.6));
                    assert_eq!(bg.period, Some(GlucosePeriod::BeforeLunch));
                }
                other => panic!("unexpected reading: {:?}", other),
            },
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!state.is_active(MeasurementType::BloodGlucose));

        // Result is terminal; late frames change nothing
        assert!(feed(&mut state, notify::glucose_tenths(70)).is_empty());
        assert_eq!(state.sub_state(MeasurementType::BloodGlucose), SubState::Result);
    }

    #[test]
    fn test_glucose_out_of_order_is_ignored() {
        let mut state = connected();
        state.begin_measurement(MeasurementType::BloodGlucose, &glucose_params());

        assert!(feed(&mut state, notify::paper_state(PaperState::BloodDetected)).is_empty());
        assert!(feed(&mut state, notify::glucose_tenths(56)).is_empty());
        assert_eq!(state.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForStrip);

        feed(&mut state, notify::paper_state(PaperState::StripDetected));
        assert!(feed(&mut state, notify::paper_state(PaperState::StripDetected)).is_empty());
        assert_eq!(state.sub_state(MeasurementType::BloodGlucose), SubState::WaitingForBlood);
    }

    #[test]
    fn test_strip_removed_cancels_glucose() {
        let mut state = connected();
        state.begin_measurement(MeasurementType::BloodGlucose, &glucose_params());
        feed(&mut state, notify::paper_state(PaperState::StripDetected));
        let events = feed(&mut state, notify::paper_state(PaperState::StripRemoved));
        assert_eq!(
            events[0],
            DeviceEvent::MeasurementStopped {
                measurement: MeasurementType::BloodGlucose,
                reason: StopReason::StripError,
            }
        );
        assert_eq!(state.sub_state(MeasurementType::BloodGlucose), SubState::Idle);
    }

    #[test]
    fn test_ecg_channels_merge() {
        let mut state = connected();
        state.begin_measurement(MeasurementType::Ecg, &MeasurementParams::default());
        feed(&mut state, notify::ecg_heart_rate(72));
        feed(&mut state, notify::ecg_wave(&[1, 2, 3, 4, 5, 6]).remove(0));
        let events = feed(&mut state, notify::ecg_wave(&[7, 8, 9, 10]).remove(0));
        feed(&mut state, notify::ecg_mood(55));

        let Some(MeasurementSession { last_reading: Some(DecodedReading::Ecg(ecg)), .. }) =
            state.session(MeasurementType::Ecg)
        else {
            panic!("no ecg reading");
        };
        assert_eq!(ecg.heart_rate, Some(72));
        assert_eq!(ecg.mood_index, Some(55));
        assert_eq!(ecg.waveform, vec![3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_only_value_frames_are_fresh() {
        let mut state = connected();
        state.begin_measurement(MeasurementType::Ecg, &MeasurementParams::default());
        let fresh = |events: Vec<DeviceEvent>| match events.as_slice() {
            [DeviceEvent::Reading(timed)] => timed.fresh,
            other => panic!("unexpected events {:?}", other),
        };
        assert!(fresh(feed(&mut state, notify::ecg_heart_rate(72))));
        assert!(!fresh(feed(&mut state, notify::ecg_wave(&[1, 2, 3]).remove(0))));
        assert!(fresh(feed(&mut state, notify::ecg_heart_rate(74))));
    }

    #[test]
    fn test_empty_reading_is_not_published() {
        let mut state = connected();
        state.begin_measurement(MeasurementType::Temperature, &MeasurementParams::default());
        assert!(feed(&mut state, notify::temperature_tenths(0)).is_empty());
        assert_eq!(feed(&mut state, notify::temperature_tenths(366)).len(), 1);
    }

    #[test]
    fn test_reading_without_session_is_discarded() {
        let mut state = connected();
        assert!(feed(&mut state, notify::temperature_tenths(366)).is_empty());
    }

    #[test]
    fn test_blood_pressure_completes_session() {
        let mut state = connected();
        state.begin_measurement(MeasurementType::BloodPressure, &MeasurementParams::default());
        assert_eq!(feed(&mut state, notify::blood_pressure(0, 0, 0, 40, 95)).len(), 1);
        assert!(state.is_active(MeasurementType::BloodPressure));

        let events = feed(&mut state, notify::blood_pressure(120, 80, 72, 100, 0));
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            DeviceEvent::MeasurementStopped {
                measurement: MeasurementType::BloodPressure,
                reason: StopReason::Completed,
            }
        );
        assert_eq!(state.sub_state(MeasurementType::BloodPressure), SubState::Idle);
    }

    #[test]
    fn test_drop_link_cancels_everything() {
        let mut state = connected();
        state.begin_measurement(MeasurementType::Temperature, &MeasurementParams::default());
        state.begin_measurement(MeasurementType::Ecg, &MeasurementParams::default());

        let events = state.drop_link(None);
        let stopped: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::MeasurementStopped { measurement, reason } => Some((*measurement, *reason)),
                _ => None,
            })
            .collect();
        assert_eq!(
            stopped,
            vec![
                (MeasurementType::Ecg, StopReason::DeviceDisconnected),
                (MeasurementType::Temperature, StopReason::DeviceDisconnected),
            ]
        );
        assert!(matches!(events.last(), Some(DeviceEvent::Disconnected { .. })));
        assert!(state.active_measurements().is_empty());
        assert!(state.drop_link(None).is_empty());
    }

    #[test]
    fn test_battery_frames_are_stored() {
        let mut state = connected();
        let events = feed(&mut state, notify::battery(64, crate::core::readings::ChargingState::Idle));
        assert_eq!(events.len(), 1);
        assert_eq!(state.battery().map(|b| b.level), Some(64));
    }
}
