//! HC03 device bridge library
//! Connects to HC03/HC02 BLE health monitors, decodes their measurement
//! frames and publishes typed readings to UI subscribers and the backend.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;

pub use error::{DeviceError, Result};
