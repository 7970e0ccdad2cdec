use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    DEFAULT_BATTERY_POLL_INTERVAL_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SCAN_TIMEOUT_SECS,
    DEVICE_NAME_PREFIXES, ECG_WAVE_WINDOW, SPO2_WAVE_WINDOW,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised names that identify a compatible device
    pub name_prefixes: Vec<String>,

    /// How long to scan before giving up with DeviceNotFound
    pub scan_timeout_secs: u64,

    /// Bound on GATT connection and service discovery
    pub connect_timeout_secs: u64,

    /// 0 disables periodic battery queries
    pub battery_poll_interval_secs: u64,

    /// ECG waveform samples kept on the live reading
    pub ecg_wave_window: usize,

    /// SpO2 waveform samples kept on the live reading
    pub spo2_wave_window: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            name_prefixes: DEVICE_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            battery_poll_interval_secs: DEFAULT_BATTERY_POLL_INTERVAL_SECS,
            ecg_wave_window: ECG_WAVE_WINDOW,
            spo2_wave_window: SPO2_WAVE_WINDOW,
        }
    }
}
