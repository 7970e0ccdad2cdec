//! Bluetooth functionality for the HC03 bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, writing commands and receiving frames from the device.

mod commands;
mod connection;
pub mod constants;
mod manager;
mod notification;
mod scanner;
mod simulated;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use commands::{CommandExecutor, CommandSender, DeviceCommand, TransportCommandSender};
pub use connection::BluestTransport;
pub use manager::DeviceManager;
pub use notification::{FrameSink, NotificationHandler};
pub use scanner::extract_mac_address;
pub use simulated::SimulatedTransport;
pub use transport::{DeviceFilter, NotificationReceiver, TransportAdapter};
pub use types::{ConnectionState, DeviceConnection, DeviceInfo};
