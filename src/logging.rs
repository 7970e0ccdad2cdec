use std::io::Write;

use chrono::Local;
use env_logger::Builder;
use log::info;

/// Initialises the global logger. `level` is an env_logger filter string
/// (`info`, `hc03_device_bridge=debug`, ...); `RUST_LOG` overrides it.
pub fn init(level: &str) -> anyhow::Result<()> {
    Builder::new()
        .parse_filters(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()?;
    info!("Logging initialized at {}", level);
    Ok(())
}
