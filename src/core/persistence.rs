//! Persistence sink and history reads
//!
//! Every published reading with something worth storing becomes one
//! `POST /api/vital-signs`. Posting is fire-and-forget: a failure is logged
//! and the live reading on the bus is untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::PersistenceConfig;
use crate::core::events::{DeviceEvent, EventBus, EventName, HandlerId};
use crate::core::readings::{DecodedReading, MeasurementType, TimedReading};
use crate::error::{DeviceError, Result};

/// Request body of `POST /api/vital-signs`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalSignsRecord {
    pub patient_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_pressure_systolic: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_pressure_diastolic: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oxygen_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_glucose: Option<f32>,
}

impl VitalSignsRecord {
    /// Only the fields relevant to the reading's type are set. Returns
    /// `None` when there is nothing to store, e.g. a blood pressure
    /// measurement still in progress.
    pub fn from_reading(patient_id: &str, reading: &DecodedReading) -> Option<Self> {
        let mut record = VitalSignsRecord {
            patient_id: patient_id.to_string(),
            ..Default::default()
        };
        match reading {
            DecodedReading::Ecg(ecg) => {
                record.heart_rate = Some(ecg.heart_rate?);
            }
            DecodedReading::BloodOxygen(ox) => {
                if ox.blood_oxygen.is_none() && ox.heart_rate.is_none() {
                    return None;
                }
                record.oxygen_level = ox.blood_oxygen;
                record.heart_rate = ox.heart_rate.map(u16::from);
            }
            DecodedReading::BloodPressure(bp) => {
                if !bp.is_complete() {
                    return None;
                }
                record.blood_pressure_systolic = bp.systolic;
                record.blood_pressure_diastolic = bp.diastolic;
                record.heart_rate = bp.heart_rate;
            }
            DecodedReading::Temperature(t) => record.temperature = Some(t.celsius?),
            DecodedReading::BloodGlucose(bg) => record.blood_glucose = Some(bg.mmol_per_l?),
        }
        Some(record)
    }
}

/// History collections the backend serves per patient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    EcgData,
    BloodOxygen,
    BloodPressure,
    Temperature,
    BloodGlucose,
    VitalSigns,
}

impl HistoryKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            HistoryKind::EcgData => "ecg-data",
            HistoryKind::BloodOxygen => "blood-oxygen",
            HistoryKind::BloodPressure => "blood-pressure",
            HistoryKind::Temperature => "temperature",
            HistoryKind::BloodGlucose => "blood-glucose",
            HistoryKind::VitalSigns => "vital-signs",
        }
    }

    pub fn for_measurement(measurement: MeasurementType) -> Self {
        match measurement {
            MeasurementType::Ecg => HistoryKind::EcgData,
            MeasurementType::BloodOxygen => HistoryKind::BloodOxygen,
            MeasurementType::BloodPressure => HistoryKind::BloodPressure,
            MeasurementType::Temperature => HistoryKind::Temperature,
            MeasurementType::BloodGlucose => HistoryKind::BloodGlucose,
        }
    }
}

/// The backend endpoints the sink and history client use
#[async_trait]
pub trait VitalSignsApi: Send + Sync {
    /// Stores one record, returning the stored representation
    async fn post_vital_signs(&self, record: &VitalSignsRecord) -> Result<Value>;

    async fn fetch_history(&self, kind: HistoryKind, patient_id: &str) -> Result<Vec<Value>>;
}

/// `reqwest` client for the vital-signs backend
pub struct HttpVitalSignsApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVitalSignsApi {
    pub fn new(config: &PersistenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VitalSignsApi for HttpVitalSignsApi {
    async fn post_vital_signs(&self, record: &VitalSignsRecord) -> Result<Value> {
        let url = format!("{}/api/vital-signs", self.base_url);
        debug!("POST {}", url);
        let stored = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(stored)
    }

    async fn fetch_history(&self, kind: HistoryKind, patient_id: &str) -> Result<Vec<Value>> {
        let url = format!("{}/api/{}/{}", self.base_url, kind.path_segment(), patient_id);
        debug!("GET {}", url);
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        match body {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }
}

/// Backend kept in memory, for tests and offline runs
#[derive(Default)]
pub struct InMemoryVitalSignsApi {
    records: Mutex<Vec<VitalSignsRecord>>,
    fail_posts: Mutex<bool>,
    fetches: Mutex<usize>,
}

impl InMemoryVitalSignsApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<VitalSignsRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_fail_posts(&self, fail: bool) {
        *self.fail_posts.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Number of history fetches served
    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl VitalSignsApi for InMemoryVitalSignsApi {
    async fn post_vital_signs(&self, record: &VitalSignsRecord) -> Result<Value> {
        if *self.fail_posts.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(DeviceError::PersistenceFailure("backend returned 500".to_string()));
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        serde_json::to_value(record).map_err(|e| DeviceError::PersistenceFailure(e.to_string()))
    }

    async fn fetch_history(&self, kind: HistoryKind, patient_id: &str) -> Result<Vec<Value>> {
        *self.fetches.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .filter(|r| r.patient_id == patient_id)
            .filter(|r| match kind {
                HistoryKind::EcgData => r.heart_rate.is_some(),
                HistoryKind::BloodOxygen => r.oxygen_level.is_some(),
                HistoryKind::BloodPressure => r.blood_pressure_systolic.is_some(),
                HistoryKind::Temperature => r.temperature.is_some(),
                HistoryKind::BloodGlucose => r.blood_glucose.is_some(),
                HistoryKind::VitalSigns => true,
            })
            .map(|r| serde_json::to_value(r).map_err(|e| DeviceError::PersistenceFailure(e.to_string())))
            .collect()
    }
}

/// Cached history reads, invalidated whenever the sink stores something
pub struct HistoryClient {
    api: Arc<dyn VitalSignsApi>,
    patient_id: String,
    cache: Mutex<HashMap<HistoryKind, Vec<Value>>>,
}

impl HistoryClient {
    pub fn new(api: Arc<dyn VitalSignsApi>, patient_id: impl Into<String>) -> Self {
        Self {
            api,
            patient_id: patient_id.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cached copy when present, otherwise fetched and cached
    pub async fn history(&self, kind: HistoryKind) -> Result<Vec<Value>> {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let fetched = self.api.fetch_history(kind, &self.patient_id).await?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, fetched.clone());
        Ok(fetched)
    }

    pub fn invalidate(&self, kinds: &[HistoryKind]) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        for kind in kinds {
            cache.remove(kind);
        }
    }

    pub fn is_cached(&self, kind: HistoryKind) -> bool {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&kind)
    }
}

const DATA_EVENTS: [EventName; 5] = [
    EventName::EcgData,
    EventName::BloodOxygenData,
    EventName::BloodPressureData,
    EventName::TemperatureData,
    EventName::BloodGlucoseData,
];

/// Forwards bus readings to the backend
pub struct PersistenceSink {
    api: Arc<dyn VitalSignsApi>,
    history: Arc<HistoryClient>,
    patient_id: String,
    stream_throttle: Duration,
    last_post: Mutex<HashMap<MeasurementType, Instant>>,
    handlers: Mutex<Vec<(EventName, HandlerId)>>,
}

impl PersistenceSink {
    pub fn new(api: Arc<dyn VitalSignsApi>, history: Arc<HistoryClient>, config: &PersistenceConfig) -> Self {
        Self {
            api,
            history,
            patient_id: config.patient_id.clone(),
            stream_throttle: Duration::from_millis(config.stream_throttle_ms),
            last_post: Mutex::new(HashMap::new()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn history(&self) -> &Arc<HistoryClient> {
        &self.history
    }

    /// Subscribes to every reading event on the bus
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        for name in DATA_EVENTS {
            let sink = Arc::clone(self);
            let id = bus.on(name, move |event| {
                if let DeviceEvent::Reading(timed) = event {
                    sink.submit(timed);
                }
                Ok(())
            });
            handlers.push((name, id));
        }
        info!("Persistence sink attached for patient {}", self.patient_id);
    }

    pub fn detach(&self, bus: &EventBus) {
        for (name, id) in self.handlers.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            bus.off(name, id);
        }
    }

    /// Streaming types (ECG, SpO2, temperature) are posted at most once per
    /// throttle window
    fn should_post(&self, measurement: MeasurementType) -> bool {
        if !measurement.is_streaming() || self.stream_throttle.is_zero() {
            return true;
        }
        let now = Instant::now();
        let mut last_post = self.last_post.lock().unwrap_or_else(PoisonError::into_inner);
        match last_post.get(&measurement) {
            Some(last) if now.duration_since(*last) < self.stream_throttle => false,
            _ => {
                last_post.insert(measurement, now);
                true
            }
        }
    }

    /// Spawns the POST for one reading. Returns whether a request was issued.
    /// Readings whose frame brought no new vital value are not posted.
    pub fn submit(self: &Arc<Self>, timed: &TimedReading) -> bool {
        if !timed.fresh {
            return false;
        }
        let Some(record) = VitalSignsRecord::from_reading(&self.patient_id, &timed.reading) else {
            return false;
        };
        let measurement = timed.reading.measurement_type();
        if !self.should_post(measurement) {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; {} reading not persisted", measurement);
            return false;
        };
        let sink = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = sink.persist(measurement, &record).await {
                warn!("{} ({})", e, e.error_code());
            }
        });
        true
    }

    /// Posts a record and invalidates the history it touches
    pub async fn persist(&self, measurement: MeasurementType, record: &VitalSignsRecord) -> Result<Value> {
        let stored = self.api.post_vital_signs(record).await?;
        debug!("Persisted {} reading", measurement);
        self.history.invalidate(&[HistoryKind::for_measurement(measurement), HistoryKind::VitalSigns]);
        Ok(stored)
    }
}
