//! HC03 bridge - headless device session runner
//!
//! Connects to the first compatible HC03 device (or a simulated one), starts
//! the requested measurements and logs every event until Ctrl-C or the
//! requested duration elapses.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use log::{info, warn};

use hc03_device_bridge::config::{AppConfig, DEFAULT_CONFIG_FILE_NAME};
use hc03_device_bridge::core::bluetooth::SimulatedTransport;
use hc03_device_bridge::core::events::EventName;
use hc03_device_bridge::core::readings::{
    GlucoseManufacturer, GlucoseParams, MeasurementParams, MeasurementType,
};
use hc03_device_bridge::{logging, state::AppState};

#[derive(Parser)]
#[command(name = "hc03-bridge")]
#[command(about = "Streams vital-sign measurements from an HC03 BLE health monitor")]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE_NAME)]
    config: String,

    /// Use a simulated device instead of the Bluetooth adapter
    #[arg(long)]
    simulate: bool,

    /// Measurement to start; repeat for several
    #[arg(long = "measure", short)]
    measure: Vec<String>,

    /// Glucose strip code (C15, C16, C17), required with bloodGlucose
    #[arg(long)]
    glucose_code: Option<String>,

    /// Glucose period, e.g. beforeBreakfast
    #[arg(long)]
    glucose_period: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn measurement_params(args: &Args, measurement: MeasurementType) -> anyhow::Result<MeasurementParams> {
    if measurement != MeasurementType::BloodGlucose {
        return Ok(MeasurementParams::default());
    }
    let Some(code) = args.glucose_code.as_deref() else {
        bail!("--glucose-code is required to measure blood glucose");
    };
    let mut params = GlucoseParams::new(GlucoseManufacturer::BeneCheck, code.parse()?);
    if let Some(period) = args.glucose_period.as_deref() {
        params = params.with_period(period.parse()?);
    }
    Ok(params.into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .await
        .with_context(|| format!("failed to load {}", args.config))?;
    logging::init(&config.logging.level)?;

    let mut measurements = Vec::new();
    for name in &args.measure {
        let measurement: MeasurementType = name.parse()?;
        measurements.push((measurement, measurement_params(&args, measurement)?));
    }

    let app_state = if args.simulate {
        info!("Running against a simulated HC03");
        AppState::with_transport(config, Arc::new(SimulatedTransport::new().with_auto_respond()))?
    } else {
        AppState::new(config).await?
    };

    for name in EventName::ALL {
        app_state.bus.on(name, move |event| {
            info!("{}: {}", name, serde_json::to_string(event)?);
            Ok(())
        });
    }

    let device = app_state.manager.connect().await?;
    info!("Connected to {} ({})", device.name, device.id);

    for (measurement, params) in measurements {
        if let Err(e) = app_state.manager.start_measurement(measurement, params).await {
            warn!("Could not start {}: {}", measurement, e);
        }
    }

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Duration elapsed"),
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    app_state.manager.disconnect().await;
    info!("Disconnected");
    Ok(())
}
