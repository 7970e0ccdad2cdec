pub mod device_config;
pub mod persistence_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub use device_config::DeviceConfig;
pub use persistence_config::PersistenceConfig;

use crate::utils::ensure_parent_dir;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "hc03-bridge.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter; `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads the config from a file, falling back to defaults when it is
    /// missing.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the config, creating parent directories first.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path).await?;

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Config saved to {:?}.", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"persistence": {"patient_id": "p-42"}}"#).unwrap();
        assert_eq!(config.persistence.patient_id, "p-42");
        assert_eq!(config.persistence.base_url, "http://localhost:5000");
        assert_eq!(config.device.scan_timeout_secs, 10);
        assert_eq!(config.device.name_prefixes, vec!["HC03", "HC02", "LT-"]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sink_requires_patient() {
        let mut persistence = PersistenceConfig::default();
        assert!(!persistence.is_active());
        persistence.patient_id = "p-1".into();
        assert!(persistence.is_active());
        persistence.enabled = false;
        assert!(!persistence.is_active());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("hc03-config-{}", std::process::id()));
        let path = dir.join("nested").join(DEFAULT_CONFIG_FILE_NAME);
        let mut config = AppConfig::default();
        config.device.battery_poll_interval_secs = 0;
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let loaded = AppConfig::load("/nonexistent/hc03/config.json").await.unwrap();
        assert_eq!(loaded, AppConfig::default());
    }
}
