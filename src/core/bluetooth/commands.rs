//! HC03 device commands
//! This module contains all the commands that can be written to the device

use std::sync::Arc;

use log::{debug, info};

use crate::core::bluetooth::constants::UUID_HC03_WRITE_CHAR;
use crate::core::bluetooth::transport::TransportAdapter;
use crate::core::protocol;
use crate::core::readings::{MeasurementParams, MeasurementType};
use crate::error::{DeviceError, Result};

/// Device commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    /// Begin a measurement
    Start(MeasurementType, MeasurementParams),
    /// End a measurement
    Stop(MeasurementType),
    /// Ask for a battery frame
    QueryBattery,
}

impl DeviceCommand {
    /// Convert the command to its frame. Fails only on invalid parameters.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Start(measurement, params) => protocol::encode_start_command(*measurement, params),
            Self::Stop(measurement) => Ok(protocol::encode_stop_command(*measurement)),
            Self::QueryBattery => Ok(protocol::encode_battery_query()),
        }
    }
}

/// Command sender trait
#[async_trait::async_trait]
pub trait CommandSender: Send + Sync {
    /// Write a pre-encoded command to the device
    async fn send_bytes(&self, bytes: &[u8]) -> Result<()>;
}

/// Writes to the HC03 command characteristic through a transport
#[derive(Clone)]
pub struct TransportCommandSender {
    transport: Arc<dyn TransportAdapter>,
}

impl TransportCommandSender {
    pub fn new(transport: Arc<dyn TransportAdapter>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl CommandSender for TransportCommandSender {
    async fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.transport
            .write_command(UUID_HC03_WRITE_CHAR, bytes)
            .await
            .map_err(|e| match e {
                DeviceError::WriteFailed(_) | DeviceError::ConnectionLost => e,
                other => DeviceError::WriteFailed(other.to_string()),
            })
    }
}

/// Command executor for the device
#[derive(Clone)]
pub struct CommandExecutor<T: CommandSender> {
    command_sender: T,
}

impl<T: CommandSender> CommandExecutor<T> {
    /// Create a new CommandExecutor
    pub fn new(command_sender: T) -> Self {
        Self { command_sender }
    }

    /// Encode and write a command. Encoding errors are returned before any
    /// bytes leave the host.
    pub async fn send(&self, command: DeviceCommand) -> Result<()> {
        let bytes = command.to_bytes()?;
        match command {
            DeviceCommand::QueryBattery => debug!("Sending command: {:?}", command),
            _ => info!("Sending command: {:?}", command),
        }
        self.command_sender.send_bytes(&bytes).await
    }

    pub async fn start_measurement(&self, measurement: MeasurementType, params: MeasurementParams) -> Result<()> {
        self.send(DeviceCommand::Start(measurement, params)).await
    }

    pub async fn stop_measurement(&self, measurement: MeasurementType) -> Result<()> {
        self.send(DeviceCommand::Stop(measurement)).await
    }

    /// Send a battery query
    pub async fn query_battery(&self) -> Result<()> {
        self.send(DeviceCommand::QueryBattery).await
    }
}
