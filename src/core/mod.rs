//! Core functionality for the HC03 device bridge
//! This module contains the codec, the device session and everything it
//! publishes to.

pub mod bluetooth;
pub mod events;
pub mod persistence;
pub mod protocol;
pub mod readings;
pub mod session;

// Re-export commonly used types
pub use bluetooth::{DeviceManager, SimulatedTransport, TransportAdapter};
pub use events::{DeviceEvent, EventBus, EventName};
pub use persistence::{HistoryClient, PersistenceSink, VitalSignsApi};
pub use readings::{DecodedReading, MeasurementParams, MeasurementType};
pub use session::{StopReason, SubState};
