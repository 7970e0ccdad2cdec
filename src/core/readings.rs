//! Measurement types and the typed readings decoded from HC03 frames
//!
//! Every physiological field is an `Option`: `None` means the device has not
//! reported a value, never a measured zero.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// The measurement kinds a session can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeasurementType {
    Ecg,
    BloodOxygen,
    BloodPressure,
    Temperature,
    BloodGlucose,
}

impl MeasurementType {
    pub const ALL: [MeasurementType; 5] = [
        MeasurementType::Ecg,
        MeasurementType::BloodOxygen,
        MeasurementType::BloodPressure,
        MeasurementType::Temperature,
        MeasurementType::BloodGlucose,
    ];

    /// Wire name used in events and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::Ecg => "ecg",
            MeasurementType::BloodOxygen => "bloodOxygen",
            MeasurementType::BloodPressure => "bloodPressure",
            MeasurementType::Temperature => "temperature",
            MeasurementType::BloodGlucose => "bloodGlucose",
        }
    }

    /// ECG, SpO2 and temperature stream until stopped; blood pressure and
    /// glucose end with a single result
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            MeasurementType::Ecg | MeasurementType::BloodOxygen | MeasurementType::Temperature
        )
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementType {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "ecg" => Ok(MeasurementType::Ecg),
            "bloodoxygen" | "spo2" | "ox" => Ok(MeasurementType::BloodOxygen),
            "bloodpressure" | "bp" => Ok(MeasurementType::BloodPressure),
            "temperature" | "bt" => Ok(MeasurementType::Temperature),
            "bloodglucose" | "glucose" | "bg" => Ok(MeasurementType::BloodGlucose),
            _ => Err(DeviceError::InvalidParameter(format!(
                "unknown measurement type: {}",
                s
            ))),
        }
    }
}

/// ECG reading, merged across the per-channel frames the device sends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcgReading {
    pub heart_rate: Option<u16>,
    /// Peak to peak interval in milliseconds
    pub rr_interval: Option<u16>,
    pub hrv: Option<u16>,
    /// 1-100, see [`MoodBand`]
    pub mood_index: Option<u16>,
    pub respiratory_rate: Option<u16>,
    pub finger_detected: Option<bool>,
    pub waveform: Vec<i16>,
}

impl EcgReading {
    pub fn mood(&self) -> Option<MoodBand> {
        self.mood_index.and_then(MoodBand::from_index)
    }
}

/// Interpretation of the ECG mood index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MoodBand {
    Chill,
    Relax,
    Balance,
    Excitation,
    Excitement,
}

impl MoodBand {
    pub fn from_index(index: u16) -> Option<Self> {
        match index {
            1..=20 => Some(MoodBand::Chill),
            21..=40 => Some(MoodBand::Relax),
            41..=60 => Some(MoodBand::Balance),
            61..=80 => Some(MoodBand::Excitation),
            81..=100 => Some(MoodBand::Excitement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodOxygenReading {
    /// Saturation in percent
    pub blood_oxygen: Option<u8>,
    pub heart_rate: Option<u8>,
    pub finger_detected: Option<bool>,
    pub waveform: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodPressureReading {
    pub systolic: Option<u16>,
    pub diastolic: Option<u16>,
    pub heart_rate: Option<u16>,
    /// Current cuff pressure in mmHg while inflating/deflating
    pub cuff_pressure: Option<u16>,
    /// 0-100
    pub progress_percent: u8,
}

impl BloodPressureReading {
    /// Progress has finished and a systolic/diastolic pair is present
    pub fn is_complete(&self) -> bool {
        self.progress_percent >= 100 && self.systolic.is_some() && self.diastolic.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureReading {
    /// Degrees Celsius, one decimal
    pub celsius: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodGlucoseReading {
    /// mmol/L, one decimal
    pub mmol_per_l: Option<f32>,
    /// Filled in by the session from the active measurement's parameters
    pub period: Option<GlucosePeriod>,
}

/// A decoded reading, one variant per measurement type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DecodedReading {
    Ecg(EcgReading),
    BloodOxygen(BloodOxygenReading),
    BloodPressure(BloodPressureReading),
    Temperature(TemperatureReading),
    BloodGlucose(BloodGlucoseReading),
}

impl DecodedReading {
    pub fn measurement_type(&self) -> MeasurementType {
        match self {
            DecodedReading::Ecg(_) => MeasurementType::Ecg,
            DecodedReading::BloodOxygen(_) => MeasurementType::BloodOxygen,
            DecodedReading::BloodPressure(_) => MeasurementType::BloodPressure,
            DecodedReading::Temperature(_) => MeasurementType::Temperature,
            DecodedReading::BloodGlucose(_) => MeasurementType::BloodGlucose,
        }
    }

    /// Whether this reading holds a value worth storing, as opposed to
    /// waveform samples, finger detection or in-progress cuff pressure
    pub fn carries_vitals(&self) -> bool {
        match self {
            DecodedReading::Ecg(r) => r.heart_rate.is_some(),
            DecodedReading::BloodOxygen(r) => r.blood_oxygen.is_some() || r.heart_rate.is_some(),
            DecodedReading::BloodPressure(r) => r.is_complete(),
            DecodedReading::Temperature(r) => r.celsius.is_some(),
            DecodedReading::BloodGlucose(r) => r.mmol_per_l.is_some(),
        }
    }

    /// Heart rate from whichever source this reading carries
    pub fn heart_rate(&self) -> Option<u16> {
        match self {
            DecodedReading::Ecg(r) => r.heart_rate,
            DecodedReading::BloodOxygen(r) => r.heart_rate.map(u16::from),
            DecodedReading::BloodPressure(r) => r.heart_rate,
            DecodedReading::Temperature(_) | DecodedReading::BloodGlucose(_) => None,
        }
    }
}

/// Battery charging state reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChargingState {
    Idle,
    Charging,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryStatus {
    /// 0-100
    pub level: u8,
    pub charging_state: ChargingState,
}

/// Test strip manufacturers the device firmware knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlucoseManufacturer {
    BeneCheck,
}

impl GlucoseManufacturer {
    pub fn code(&self) -> u8 {
        match self {
            GlucoseManufacturer::BeneCheck => 0x01,
        }
    }
}

impl FromStr for GlucoseManufacturer {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "BENE_CHECK" | "BENECHECK" => Ok(GlucoseManufacturer::BeneCheck),
            other => Err(DeviceError::InvalidParameter(format!(
                "unknown glucose strip manufacturer: {}",
                other
            ))),
        }
    }
}

/// Strip calibration code printed on the strip vial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripCode {
    C15,
    C16,
    C17,
}

impl StripCode {
    pub fn code(&self) -> u8 {
        match self {
            StripCode::C15 => 15,
            StripCode::C16 => 16,
            StripCode::C17 => 17,
        }
    }
}

impl FromStr for StripCode {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C15" => Ok(StripCode::C15),
            "C16" => Ok(StripCode::C16),
            "C17" => Ok(StripCode::C17),
            other => Err(DeviceError::InvalidParameter(format!(
                "unknown strip code: {}",
                other
            ))),
        }
    }
}

/// When, relative to meals, a glucose sample was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GlucosePeriod {
    BeforeBreakfast,
    AfterBreakfast,
    BeforeLunch,
    AfterLunch,
    BeforeDinner,
    AfterDinner,
}

impl FromStr for GlucosePeriod {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace([' ', '-', '_'], "").as_str() {
            "beforebreakfast" => Ok(GlucosePeriod::BeforeBreakfast),
            "afterbreakfast" => Ok(GlucosePeriod::AfterBreakfast),
            "beforelunch" => Ok(GlucosePeriod::BeforeLunch),
            "afterlunch" => Ok(GlucosePeriod::AfterLunch),
            "beforedinner" => Ok(GlucosePeriod::BeforeDinner),
            "afterdinner" => Ok(GlucosePeriod::AfterDinner),
            _ => Err(DeviceError::InvalidParameter(format!(
                "unknown glucose measurement period: {}",
                s
            ))),
        }
    }
}

/// Parameters required to start a glucose measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseParams {
    pub manufacturer: GlucoseManufacturer,
    pub strip_code: StripCode,
    pub period: Option<GlucosePeriod>,
}

impl GlucoseParams {
    pub fn new(manufacturer: GlucoseManufacturer, strip_code: StripCode) -> Self {
        Self {
            manufacturer,
            strip_code,
            period: None,
        }
    }

    /// Parses the free-text values a UI collects; anything outside the
    /// enumerated sets is rejected with `InvalidParameter`.
    pub fn parse(manufacturer: &str, strip_code: &str, period: Option<&str>) -> crate::Result<Self> {
        Ok(Self {
            manufacturer: manufacturer.parse()?,
            strip_code: strip_code.parse()?,
            period: period.map(str::parse).transpose()?,
        })
    }

    pub fn with_period(mut self, period: GlucosePeriod) -> Self {
        self.period = Some(period);
        self
    }
}

/// Optional parameters to `start_measurement`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementParams {
    pub glucose: Option<GlucoseParams>,
}

impl From<GlucoseParams> for MeasurementParams {
    fn from(glucose: GlucoseParams) -> Self {
        Self {
            glucose: Some(glucose),
        }
    }
}

/// A reading stamped with when and from which device it was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedReading {
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<String>,
    pub reading: DecodedReading,
    /// The frame behind this reading brought a new vital value. Streaming
    /// readings are merged, so most of them only repeat earlier values.
    #[serde(skip)]
    pub fresh: bool,
}
