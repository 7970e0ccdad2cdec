//! Constants used throughout the application
//! This module contains the HC03 GATT layout, advertised names and the
//! timing defaults the configuration falls back to.

use uuid::Uuid;

/// Advertised name prefixes of compatible devices
pub const DEVICE_NAME_PREFIXES: [&str; 3] = ["HC03", "HC02", "LT-"];

/// The UUID of the HC03 measurement service
pub const UUID_HC03_SERVICE: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);

/// The UUID of the HC03 write (command) characteristic
pub const UUID_HC03_WRITE_CHAR: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);

/// The UUID of the HC03 notification characteristic
pub const UUID_HC03_NOTIFY_CHAR: Uuid = Uuid::from_u128(0x0000fff2_0000_1000_8000_00805f9b34fb);

/// How long a scan waits for a matching advertisement
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 10;

/// Timeout for GATT connection and service discovery in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Battery re-query interval while connected
pub const DEFAULT_BATTERY_POLL_INTERVAL_SECS: u64 = 60;

/// ECG waveform samples kept on the live reading
pub const ECG_WAVE_WINDOW: usize = 2200;

/// SpO2 waveform samples kept on the live reading
pub const SPO2_WAVE_WINDOW: usize = 400;
