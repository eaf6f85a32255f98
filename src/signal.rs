//! Reading and alert-record shapes exchanged with the ingestion boundary.
//!
//! A `Reading` enters the engine, an `AlertRecord` leaves it. Neither is
//! mutated after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one independent streaming model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_id: String,
    pub signal_name: String,
}

impl EntityKey {
    pub fn new(entity_id: impl Into<String>, signal_name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            signal_name: signal_name.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.signal_name)
    }
}

/// One sensor observation from one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub entity_id: String,
    pub signal_name: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        entity_id: impl Into<String>,
        signal_name: impl Into<String>,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            signal_name: signal_name.into(),
            value,
            observed_at,
        }
    }

    /// Reading stamped with the current wall clock.
    pub fn now(entity_id: impl Into<String>, signal_name: impl Into<String>, value: f64) -> Self {
        Self::new(entity_id, signal_name, value, Utc::now())
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_id.clone(), self.signal_name.clone())
    }
}

/// Result of processing one accepted reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub entity_id: String,
    pub signal_name: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    /// Value fell outside the configured static bounds
    pub static_alert: bool,
    /// Adaptive score in [0, 1], higher = more anomalous
    pub anomaly_score: f64,
}

impl AlertRecord {
    pub fn from_reading(reading: &Reading, static_alert: bool, anomaly_score: f64) -> Self {
        Self {
            entity_id: reading.entity_id.clone(),
            signal_name: reading.signal_name.clone(),
            value: reading.value,
            observed_at: reading.observed_at,
            static_alert,
            anomaly_score,
        }
    }
}
