//! UI commands
//! This module defines the calls a front end makes. Every failure comes back
//! as a display string; typed errors also go out as `bluetoothError` events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::bluetooth::{ConnectionState, DeviceInfo};
use crate::core::persistence::HistoryKind;
use crate::core::readings::{
    BatteryStatus, DecodedReading, GlucoseParams, MeasurementParams, MeasurementType,
};
use crate::core::session::SubState;
use crate::state::AppState;

/// Glucose fields as the measurement dialog submits them
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseRequest {
    pub manufacturer: String,
    pub code: String,
    pub period: Option<String>,
}

/// What a status panel renders
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub connection_state: ConnectionState,
    pub device: Option<DeviceInfo>,
    pub active_measurements: Vec<MeasurementType>,
    pub glucose_state: SubState,
    pub battery: Option<BatteryStatus>,
    pub last_error: Option<String>,
}

/// Scans for and connects to the first compatible device
pub async fn connect_device(app_state: &AppState) -> Result<DeviceInfo, String> {
    app_state.manager.connect().await.map_err(|e| e.to_string())
}

/// Disconnects from the current device. Always succeeds.
pub async fn disconnect_device(app_state: &AppState) -> Result<(), String> {
    app_state.manager.disconnect().await;
    Ok(())
}

/// Starts a measurement
///
/// # Arguments
/// * `measurement` - `ecg`, `bloodOxygen`, `bloodPressure`, `temperature` or `bloodGlucose`
/// * `glucose` - strip details, required for `bloodGlucose` only
pub async fn start_measurement(
    app_state: &AppState,
    measurement: String,
    glucose: Option<GlucoseRequest>,
) -> Result<(), String> {
    let measurement: MeasurementType = measurement.parse().map_err(|e: crate::DeviceError| e.to_string())?;
    let params = match glucose {
        Some(req) => MeasurementParams::from(
            GlucoseParams::parse(&req.manufacturer, &req.code, req.period.as_deref())
                .map_err(|e| e.to_string())?,
        ),
        None => MeasurementParams::default(),
    };
    app_state
        .manager
        .start_measurement(measurement, params)
        .await
        .map_err(|e| e.to_string())
}

pub async fn stop_measurement(app_state: &AppState, measurement: String) -> Result<(), String> {
    let measurement: MeasurementType = measurement.parse().map_err(|e: crate::DeviceError| e.to_string())?;
    app_state
        .manager
        .stop_measurement(measurement)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_battery_level(app_state: &AppState) -> Result<BatteryStatus, String> {
    app_state.manager.query_battery().await.map_err(|e| e.to_string())?;
    app_state
        .bus
        .latest_battery()
        .ok_or_else(|| "No battery level available yet".to_string())
}

/// Last known reading of a type, kept across reconnects
pub fn get_latest_reading(app_state: &AppState, measurement: String) -> Result<Option<DecodedReading>, String> {
    let measurement: MeasurementType = measurement.parse().map_err(|e: crate::DeviceError| e.to_string())?;
    Ok(app_state.bus.latest(measurement))
}

pub fn get_session_snapshot(app_state: &AppState) -> SessionSnapshot {
    let manager = &app_state.manager;
    let connection = manager.connection();
    SessionSnapshot {
        connection_state: connection.connection_state,
        device: manager.device(),
        active_measurements: manager.active_measurements(),
        glucose_state: manager.sub_state(MeasurementType::BloodGlucose),
        battery: app_state.bus.latest_battery(),
        last_error: connection.last_error.map(|e| e.to_string()),
    }
}

/// Stored history for a measurement type, or `vitalSigns` for all of them
pub async fn get_history(app_state: &AppState, kind: String) -> Result<Vec<Value>, String> {
    let kind = match kind.as_str() {
        "vitalSigns" | "vital-signs" => HistoryKind::VitalSigns,
        other => HistoryKind::for_measurement(other.parse().map_err(|e: crate::DeviceError| e.to_string())?),
    };
    let sink = app_state
        .sink
        .as_ref()
        .ok_or_else(|| "Persistence is not configured".to_string())?;
    sink.history().history(kind).await.map_err(|e| e.to_string())
}
