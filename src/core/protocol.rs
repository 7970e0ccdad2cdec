//! HC03 frame codec
//!
//! Pure translation between typed commands/readings and the device's binary
//! frames. Both directions share one envelope:
//!
//! ```text
//! 0xAA 0xAA <type> <len> <payload: len bytes> <checksum>
//! ```
//!
//! where `checksum = (type + len + sum(payload)) mod 256`. Integers are
//! little-endian. Decoding never fails loudly: anything malformed becomes
//! [`Frame::Unrecognized`].

use serde::{Deserialize, Serialize};

use crate::core::readings::{
    BatteryStatus, BloodGlucoseReading, BloodOxygenReading, BloodPressureReading,
    ChargingState, DecodedReading, EcgReading, MeasurementParams, MeasurementType,
    TemperatureReading,
};
use crate::error::{DeviceError, Result};

/// Two-byte frame header
pub const FRAME_HEADER: [u8; 2] = [0xAA, 0xAA];

/// Header, type, length and checksum
pub const FRAME_OVERHEAD: usize = 5;

pub const TYPE_ECG: u8 = 0x12;
pub const TYPE_TEMPERATURE: u8 = 0x13;
pub const TYPE_BLOOD_OXYGEN: u8 = 0x14;
pub const TYPE_BLOOD_PRESSURE: u8 = 0x15;
pub const TYPE_BLOOD_GLUCOSE: u8 = 0x16;
pub const TYPE_BATTERY: u8 = 0x17;

const CMD_START: u8 = 0x01;
const CMD_STOP: u8 = 0x00;

// ECG sub-types
const ECG_WAVE: u8 = 0x01;
const ECG_HEART_RATE: u8 = 0x02;
const ECG_MOOD: u8 = 0x03;
const ECG_RR_INTERVAL: u8 = 0x04;
const ECG_HRV: u8 = 0x05;
const ECG_RESPIRATORY_RATE: u8 = 0x06;
const ECG_FINGER: u8 = 0x07;

// SpO2 sub-types
const OX_VALUES: u8 = 0x01;
const OX_WAVE: u8 = 0x02;
const OX_FINGER: u8 = 0x03;

// Glucose sub-types
const BG_VALUE: u8 = 0x01;
const BG_PAPER_STATE: u8 = 0x02;

/// Glucose test-strip progress reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaperState {
    StripRequested,
    StripDetected,
    BloodDetected,
    Testing,
    StripRemoved,
    Error,
}

impl PaperState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(PaperState::StripRequested),
            0x02 => Some(PaperState::StripDetected),
            0x03 => Some(PaperState::BloodDetected),
            0x04 => Some(PaperState::Testing),
            0x05 => Some(PaperState::StripRemoved),
            0xFF => Some(PaperState::Error),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            PaperState::StripRequested => 0x01,
            PaperState::StripDetected => 0x02,
            PaperState::BloodDetected => 0x03,
            PaperState::Testing => 0x04,
            PaperState::StripRemoved => 0x05,
            PaperState::Error => 0xFF,
        }
    }
}

/// Result of decoding one notification
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Reading(DecodedReading),
    PaperState(PaperState),
    Battery(BatteryStatus),
    Unrecognized,
}

/// Largest payload the one-byte length field can describe
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Waveform samples (two bytes each) that fit beside the sub-type byte
pub const WAVE_SAMPLES_PER_FRAME: usize = (MAX_PAYLOAD_LEN - 1) / 2;

fn checksum(frame_type: u8, len: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(frame_type.wrapping_add(len), |acc, b| acc.wrapping_add(*b))
}

fn envelope(frame_type: u8, len: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&FRAME_HEADER);
    frame.push(frame_type);
    frame.push(len);
    frame.extend_from_slice(payload);
    frame.push(checksum(frame_type, len, payload));
    frame
}

/// Wraps a payload in the frame envelope. Payloads longer than
/// [`MAX_PAYLOAD_LEN`] are rejected.
pub fn build_frame(frame_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u8::try_from(payload.len()).map_err(|_| {
        DeviceError::InvalidParameter(format!(
            "frame payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD_LEN
        ))
    })?;
    Ok(envelope(frame_type, len, payload))
}

/// Frames a fixed-size payload; the length limit is checked at compile time
fn fixed_frame<const N: usize>(frame_type: u8, payload: [u8; N]) -> Vec<u8> {
    const { assert!(N <= MAX_PAYLOAD_LEN) };
    envelope(frame_type, N as u8, &payload)
}

pub fn frame_type_for(measurement: MeasurementType) -> u8 {
    match measurement {
        MeasurementType::Ecg => TYPE_ECG,
        MeasurementType::Temperature => TYPE_TEMPERATURE,
        MeasurementType::BloodOxygen => TYPE_BLOOD_OXYGEN,
        MeasurementType::BloodPressure => TYPE_BLOOD_PRESSURE,
        MeasurementType::BloodGlucose => TYPE_BLOOD_GLUCOSE,
    }
}

/// Encodes the start command for a measurement.
///
/// Glucose requires manufacturer and strip code; the other types take no
/// parameters and reject any that are supplied.
pub fn encode_start_command(measurement: MeasurementType, params: &MeasurementParams) -> Result<Vec<u8>> {
    let frame_type = frame_type_for(measurement);
    match (measurement, params.glucose) {
        (MeasurementType::BloodGlucose, Some(glucose)) => Ok(fixed_frame(
            frame_type,
            [CMD_START, glucose.manufacturer.code(), glucose.strip_code.code()],
        )),
        (MeasurementType::BloodGlucose, None) => Err(DeviceError::InvalidParameter(
            "blood glucose requires a strip manufacturer and code".to_string(),
        )),
        (_, Some(_)) => Err(DeviceError::InvalidParameter(format!(
            "{} takes no glucose parameters",
            measurement
        ))),
        (_, None) => Ok(fixed_frame(frame_type, [CMD_START])),
    }
}

pub fn encode_stop_command(measurement: MeasurementType) -> Vec<u8> {
    fixed_frame(frame_type_for(measurement), [CMD_STOP])
}

pub fn encode_battery_query() -> Vec<u8> {
    fixed_frame(TYPE_BATTERY, [CMD_START])
}

fn u16_at(payload: &[u8], offset: usize) -> Option<u16> {
    payload
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

/// Zero is the device's "nothing yet" marker
fn non_zero(value: u16) -> Option<u16> {
    (value != 0).then_some(value)
}

/// Decodes one notification frame. Never panics, never errors.
pub fn decode_frame(bytes: &[u8]) -> Frame {
    if bytes.len() < FRAME_OVERHEAD || bytes[..2] != FRAME_HEADER {
        return Frame::Unrecognized;
    }
    let frame_type = bytes[2];
    let len = bytes[3] as usize;
    if bytes.len() != len + FRAME_OVERHEAD {
        return Frame::Unrecognized;
    }
    let payload = &bytes[4..4 + len];
    if checksum(frame_type, bytes[3], payload) != bytes[4 + len] {
        return Frame::Unrecognized;
    }

    let decoded = match frame_type {
        TYPE_ECG => decode_ecg(payload),
        TYPE_TEMPERATURE => decode_temperature(payload),
        TYPE_BLOOD_OXYGEN => decode_blood_oxygen(payload),
        TYPE_BLOOD_PRESSURE => decode_blood_pressure(payload),
        TYPE_BLOOD_GLUCOSE => decode_blood_glucose(payload),
        TYPE_BATTERY => decode_battery(payload),
        _ => None,
    };
    decoded.unwrap_or(Frame::Unrecognized)
}

fn decode_ecg(payload: &[u8]) -> Option<Frame> {
    let (&sub, data) = payload.split_first()?;
    let mut reading = EcgReading::default();
    match sub {
        ECG_WAVE => {
            if data.is_empty() || data.len() % 2 != 0 {
                return None;
            }
            reading.waveform = data
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect();
        }
        ECG_HEART_RATE => reading.heart_rate = non_zero(u16_at(data, 0)?),
        ECG_MOOD => reading.mood_index = non_zero(u16_at(data, 0)?),
        ECG_RR_INTERVAL => reading.rr_interval = non_zero(u16_at(data, 0)?),
        ECG_HRV => reading.hrv = non_zero(u16_at(data, 0)?),
        ECG_RESPIRATORY_RATE => reading.respiratory_rate = non_zero(u16_at(data, 0)?),
        ECG_FINGER => reading.finger_detected = Some(*data.first()? == 1),
        _ => return None,
    }
    Some(Frame::Reading(DecodedReading::Ecg(reading)))
}

fn decode_temperature(payload: &[u8]) -> Option<Frame> {
    let tenths = u16_at(payload, 0)?;
    let celsius = non_zero(tenths).map(|t| t as f32 / 10.0);
    Some(Frame::Reading(DecodedReading::Temperature(TemperatureReading { celsius })))
}

fn decode_blood_oxygen(payload: &[u8]) -> Option<Frame> {
    let (&sub, data) = payload.split_first()?;
    let mut reading = BloodOxygenReading::default();
    match sub {
        OX_VALUES => {
            let spo2 = *data.first()?;
            let heart_rate = *data.get(1)?;
            reading.blood_oxygen = (spo2 != 0).then_some(spo2);
            reading.heart_rate = (heart_rate != 0).then_some(heart_rate);
        }
        OX_WAVE => {
            if data.is_empty() || data.len() % 2 != 0 {
                return None;
            }
            reading.waveform = data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
        }
        OX_FINGER => reading.finger_detected = Some(*data.first()? == 1),
        _ => return None,
    }
    Some(Frame::Reading(DecodedReading::BloodOxygen(reading)))
}

fn decode_blood_pressure(payload: &[u8]) -> Option<Frame> {
    let systolic = u16_at(payload, 0)?;
    let diastolic = u16_at(payload, 2)?;
    let heart_rate = u16_at(payload, 4)?;
    let progress = *payload.get(6)?;
    if progress > 100 {
        return None;
    }
    let reading = BloodPressureReading {
        systolic: non_zero(systolic),
        diastolic: non_zero(diastolic),
        heart_rate: non_zero(heart_rate),
        cuff_pressure: u16_at(payload, 7).and_then(non_zero),
        progress_percent: progress,
    };
    Some(Frame::Reading(DecodedReading::BloodPressure(reading)))
}

fn decode_blood_glucose(payload: &[u8]) -> Option<Frame> {
    let (&sub, data) = payload.split_first()?;
    match sub {
        BG_VALUE => {
            let tenths = u16_at(data, 0)?;
            Some(Frame::Reading(DecodedReading::BloodGlucose(BloodGlucoseReading {
                mmol_per_l: non_zero(tenths).map(|t| t as f32 / 10.0),
                period: None,
            })))
        }
        BG_PAPER_STATE => PaperState::from_code(*data.first()?).map(Frame::PaperState),
        _ => None,
    }
}

fn decode_battery(payload: &[u8]) -> Option<Frame> {
    let level = *payload.first()?;
    if level > 100 {
        return None;
    }
    let charging_state = match *payload.get(1)? {
        0 => ChargingState::Idle,
        1 => ChargingState::Charging,
        2 => ChargingState::Full,
        _ => return None,
    };
    Some(Frame::Battery(BatteryStatus { level, charging_state }))
}

/// Builders for notification frames, used by the simulated device and tests
pub mod notify {
    use super::*;

    fn wave_frames(frame_type: u8, sub: u8, samples: impl Iterator<Item = [u8; 2]>) -> Vec<Vec<u8>> {
        let samples: Vec<[u8; 2]> = samples.collect();
        samples
            .chunks(WAVE_SAMPLES_PER_FRAME)
            .map(|chunk| {
                let mut payload = Vec::with_capacity(1 + chunk.len() * 2);
                payload.push(sub);
                payload.extend(chunk.iter().flatten());
                // At most 1 + 2 * WAVE_SAMPLES_PER_FRAME bytes
                envelope(frame_type, payload.len() as u8, &payload)
            })
            .collect()
    }

    pub fn ecg_heart_rate(bpm: u16) -> Vec<u8> {
        let [lo, hi] = bpm.to_le_bytes();
        fixed_frame(TYPE_ECG, [ECG_HEART_RATE, lo, hi])
    }

    pub fn ecg_rr_interval(ms: u16) -> Vec<u8> {
        let [lo, hi] = ms.to_le_bytes();
        fixed_frame(TYPE_ECG, [ECG_RR_INTERVAL, lo, hi])
    }

    pub fn ecg_hrv(hrv: u16) -> Vec<u8> {
        let [lo, hi] = hrv.to_le_bytes();
        fixed_frame(TYPE_ECG, [ECG_HRV, lo, hi])
    }

    pub fn ecg_mood(index: u16) -> Vec<u8> {
        let [lo, hi] = index.to_le_bytes();
        fixed_frame(TYPE_ECG, [ECG_MOOD, lo, hi])
    }

    pub fn ecg_respiratory_rate(rate: u16) -> Vec<u8> {
        let [lo, hi] = rate.to_le_bytes();
        fixed_frame(TYPE_ECG, [ECG_RESPIRATORY_RATE, lo, hi])
    }

    pub fn ecg_finger(detected: bool) -> Vec<u8> {
        fixed_frame(TYPE_ECG, [ECG_FINGER, detected as u8])
    }

    /// One frame per [`WAVE_SAMPLES_PER_FRAME`] samples
    pub fn ecg_wave(samples: &[i16]) -> Vec<Vec<u8>> {
        wave_frames(TYPE_ECG, ECG_WAVE, samples.iter().map(|s| s.to_le_bytes()))
    }

    pub fn blood_oxygen(spo2: u8, heart_rate: u8) -> Vec<u8> {
        fixed_frame(TYPE_BLOOD_OXYGEN, [OX_VALUES, spo2, heart_rate])
    }

    /// One frame per [`WAVE_SAMPLES_PER_FRAME`] samples
    pub fn blood_oxygen_wave(samples: &[u16]) -> Vec<Vec<u8>> {
        wave_frames(TYPE_BLOOD_OXYGEN, OX_WAVE, samples.iter().map(|s| s.to_le_bytes()))
    }

    pub fn blood_oxygen_finger(detected: bool) -> Vec<u8> {
        fixed_frame(TYPE_BLOOD_OXYGEN, [OX_FINGER, detected as u8])
    }

    pub fn blood_pressure(systolic: u16, diastolic: u16, heart_rate: u16, progress: u8, cuff: u16) -> Vec<u8> {
        let [s_lo, s_hi] = systolic.to_le_bytes();
        let [d_lo, d_hi] = diastolic.to_le_bytes();
        let [h_lo, h_hi] = heart_rate.to_le_bytes();
        let [c_lo, c_hi] = cuff.to_le_bytes();
        fixed_frame(TYPE_BLOOD_PRESSURE, [s_lo, s_hi, d_lo, d_hi, h_lo, h_hi, progress, c_lo, c_hi])
    }

    pub fn temperature_tenths(tenths: u16) -> Vec<u8> {
        fixed_frame(TYPE_TEMPERATURE, tenths.to_le_bytes())
    }

    pub fn glucose_tenths(tenths: u16) -> Vec<u8> {
        let [lo, hi] = tenths.to_le_bytes();
        fixed_frame(TYPE_BLOOD_GLUCOSE, [BG_VALUE, lo, hi])
    }

    pub fn paper_state(state: PaperState) -> Vec<u8> {
        fixed_frame(TYPE_BLOOD_GLUCOSE, [BG_PAPER_STATE, state.code()])
    }

    pub fn battery(level: u8, charging: ChargingState) -> Vec<u8> {
        let state = match charging {
            ChargingState::Idle => 0,
            ChargingState::Charging => 1,
            ChargingState::Full => 2,
        };
        fixed_frame(TYPE_BATTERY, [level, state])
    }
}
