//! Scripted stand-in for the BLE stack
//!
//! Implements [`TransportAdapter`] entirely in memory. Tests drive it frame
//! by frame; with auto-respond enabled it answers start commands with canned
//! HC03 notifications so the bridge can run without hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{UUID_HC03_NOTIFY_CHAR, UUID_HC03_WRITE_CHAR};
use crate::core::bluetooth::transport::{DeviceFilter, NotificationReceiver, TransportAdapter};
use crate::core::bluetooth::types::DeviceInfo;
use crate::core::protocol::{self, PaperState, notify};
use crate::core::readings::ChargingState;
use crate::error::{DeviceError, Result};

const FRAME_SPACING: Duration = Duration::from_millis(250);

#[derive(Default)]
struct SimState {
    supported: bool,
    device: Option<DeviceInfo>,
    connected: bool,
    subscribers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    written: Vec<Vec<u8>>,
    request_count: usize,
    fail_next_request: Option<DeviceError>,
    fail_next_connect: Option<DeviceError>,
    fail_writes: bool,
    hold_chooser: bool,
    auto_respond: bool,
    scripts: HashMap<u8, CancellationToken>,
    battery_level: u8,
}

struct Inner {
    state: Mutex<SimState>,
    chooser: Notify,
}

/// In-memory HC03 device
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Inner>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// A supported host with one HC03 in range
    pub fn new() -> Self {
        let state = SimState {
            supported: true,
            device: Some(
                DeviceInfo::new("sim-hc03-0001", "HC03-SIM")
                    .with_address(Some("00:11:22:33:44:55".to_string()))
                    .with_rssi(Some(-55)),
            ),
            battery_level: 87,
            ..SimState::default()
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                chooser: Notify::new(),
            }),
        }
    }

    /// Answers start commands and battery queries with canned frames
    pub fn with_auto_respond(self) -> Self {
        self.state().auto_respond = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_supported(&self, supported: bool) {
        self.state().supported = supported;
    }

    /// Replaces the device in range; `None` leaves nothing to find
    pub fn set_device(&self, device: Option<DeviceInfo>) {
        self.state().device = device;
    }

    pub fn fail_next_request(&self, err: DeviceError) {
        self.state().fail_next_request = Some(err);
    }

    pub fn fail_next_connect(&self, err: DeviceError) {
        self.state().fail_next_connect = Some(err);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Keeps `request_device` waiting, as if the chooser were still open
    pub fn hold_chooser(&self) {
        self.state().hold_chooser = true;
    }

    pub fn release_chooser(&self) {
        self.state().hold_chooser = false;
        self.inner.chooser.notify_one();
    }

    pub fn request_count(&self) -> usize {
        self.state().request_count
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Every command written so far, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    pub fn clear_written(&self) {
        self.state().written.clear();
    }

    /// Delivers one notification to every subscriber
    pub fn push_frame(&self, frame: Vec<u8>) {
        Self::deliver(&mut self.state(), frame);
    }

    fn deliver(state: &mut SimState, frame: Vec<u8>) {
        if !state.connected {
            return;
        }
        state.subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
    }

    /// Simulates the device going out of range
    pub fn drop_link(&self) {
        let mut state = self.state();
        info!("Simulated link dropped");
        state.connected = false;
        state.subscribers.clear();
        for (_, token) in state.scripts.drain() {
            token.cancel();
        }
    }

    fn respond(&self, state: &mut SimState, bytes: &[u8]) {
        let (Some(&frame_type), Some(&command)) = (bytes.get(2), bytes.get(4)) else {
            return;
        };
        if frame_type == protocol::TYPE_BATTERY {
            let level = state.battery_level;
            Self::deliver(state, notify::battery(level, ChargingState::Idle));
            return;
        }
        if let Some(token) = state.scripts.remove(&frame_type) {
            token.cancel();
        }
        if command == 0x00 {
            return;
        }

        let token = CancellationToken::new();
        state.scripts.insert(frame_type, token.clone());
        let sim = self.clone();
        tokio::spawn(async move {
            let mut round: u16 = 0;
            loop {
                let frames = canned_frames(frame_type, round);
                if frames.is_empty() {
                    break;
                }
                for frame in frames {
                    tokio::select! {
                        _ = tokio::time::sleep(FRAME_SPACING) => sim.push_frame(frame),
                        _ = token.cancelled() => return,
                    }
                }
                round = round.wrapping_add(1);
            }
            debug!("Script for frame type {:#04x} finished", frame_type);
        });
    }
}

/// Frames the simulated device sends after a start command. Streaming
/// types return a fresh batch every round; single-shot types play once.
fn canned_frames(frame_type: u8, round: u16) -> Vec<Vec<u8>> {
    let wobble = round % 5;
    let phase = round % 100;
    match (frame_type, round) {
        (protocol::TYPE_ECG, _) => {
            let wave: Vec<i16> = (0..32).map(|i| ((i * 37 + phase as i16 * 11) % 400) - 200).collect();
            let mut frames = notify::ecg_wave(&wave);
            frames.push(notify::ecg_heart_rate(70 + wobble));
            if round == 0 {
                frames.push(notify::ecg_finger(true));
            }
            if round % 4 == 3 {
                frames.push(notify::ecg_rr_interval(820 + wobble * 5));
                frames.push(notify::ecg_hrv(42 + wobble));
                frames.push(notify::ecg_mood(50 + wobble));
                frames.push(notify::ecg_respiratory_rate(16));
            }
            frames
        }
        (protocol::TYPE_BLOOD_OXYGEN, _) => {
            let wave: Vec<u16> = (0..20).map(|i| 500 + ((i * 53 + phase * 7) % 300)).collect();
            let mut frames = notify::blood_oxygen_wave(&wave);
            if round == 0 {
                frames.push(notify::blood_oxygen_finger(true));
            }
            frames.push(notify::blood_oxygen(97 + (wobble % 3) as u8, 72 + wobble as u8));
            frames
        }
        (protocol::TYPE_BLOOD_PRESSURE, 0) => vec![
            notify::blood_pressure(0, 0, 0, 20, 80),
            notify::blood_pressure(0, 0, 0, 55, 150),
            notify::blood_pressure(0, 0, 0, 85, 110),
            notify::blood_pressure(121, 79, 71, 100, 0),
        ],
        (protocol::TYPE_TEMPERATURE, _) if round < 3 => vec![notify::temperature_tenths(365 + wobble)],
        (protocol::TYPE_BLOOD_GLUCOSE, 0) => vec![
            notify::paper_state(PaperState::StripDetected),
            notify::paper_state(PaperState::BloodDetected),
            notify::paper_state(PaperState::Testing),
            notify::glucose_tenths(56),
        ],
        _ => Vec::new(),
    }
}

#[async_trait]
impl TransportAdapter for SimulatedTransport {
    async fn is_supported(&self) -> bool {
        self.state().supported
    }

    async fn request_device(&self, filter: &DeviceFilter) -> Result<DeviceInfo> {
        let held = {
            let mut state = self.state();
            state.request_count += 1;
            state.hold_chooser
        };
        if held {
            self.inner.chooser.notified().await;
        }

        let mut state = self.state();
        if let Some(err) = state.fail_next_request.take() {
            return Err(err);
        }
        match &state.device {
            Some(device) if filter.matches(Some(&device.name), &[]) => Ok(device.clone()),
            _ => Err(DeviceError::DeviceNotFound),
        }
    }

    async fn connect_gatt(&self, device: &DeviceInfo) -> Result<()> {
        let mut state = self.state();
        if let Some(err) = state.fail_next_connect.take() {
            return Err(err);
        }
        info!("Simulated connect to {}", device.id);
        state.connected = true;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationReceiver> {
        if characteristic != UUID_HC03_NOTIFY_CHAR {
            return Err(DeviceError::Transport(format!(
                "characteristic {} does not notify",
                characteristic
            )));
        }
        let mut state = self.state();
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        Ok(rx)
    }

    async fn write_command(&self, characteristic: Uuid, bytes: &[u8]) -> Result<()> {
        if characteristic != UUID_HC03_WRITE_CHAR {
            return Err(DeviceError::WriteFailed(format!(
                "characteristic {} is not writable",
                characteristic
            )));
        }
        let mut state = self.state();
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        if state.fail_writes {
            return Err(DeviceError::WriteFailed("simulated write failure".to_string()));
        }
        state.written.push(bytes.to_vec());
        if state.auto_respond {
            self.respond(&mut state, bytes);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state();
        state.connected = false;
        state.subscribers.clear();
        for (_, token) in state.scripts.drain() {
            token.cancel();
        }
        Ok(())
    }
}
