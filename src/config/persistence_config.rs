use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,

    /// Backend root, e.g. `http://localhost:5000`
    pub base_url: String,

    /// Patient the readings are stored against. Empty disables the sink.
    pub patient_id: String,

    pub request_timeout_secs: u64,

    /// Minimum spacing between POSTs for ECG and SpO2; 0 posts every reading
    pub stream_throttle_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            enabled: true,
            base_url: "http://localhost:5000".to_string(),
            patient_id: String::new(),
            request_timeout_secs: 10,
            stream_throttle_ms: 1000,
        }
    }
}

impl PersistenceConfig {
    /// Whether readings will actually be posted
    pub fn is_active(&self) -> bool {
        self.enabled && !self.patient_id.trim().is_empty()
    }
}
