//! Ingestion pipeline
//!
//! One reading in, one `AlertRecord` out:
//! 1. Validation: allow-listed signal, finite value
//! 2. Static check against the signal's configured bounds
//! 3. Adaptive score from the key's streaming model
//!
//! The pipeline performs no I/O. Persisting the record is the caller's job
//! and happens after `process` returns, outside every model lock.

use tracing::{debug, warn};

use crate::config::{EngineConfig, SignalBounds};
use crate::error::{EngineError, Result};
use crate::registry::ModelRegistry;
use crate::signal::{AlertRecord, Reading};

pub struct Engine {
    config: EngineConfig,
    registry: ModelRegistry,
}

impl Engine {
    /// Validate `config` and build an empty registry.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let registry = ModelRegistry::new(config.model.clone());
        Ok(Self { config, registry })
    }

    /// Validate a reading and run its static check without touching any
    /// model. Returns the static alert flag.
    pub fn screen(&self, reading: &Reading) -> Result<bool> {
        self.checked_bounds(reading)
            .map(|bounds| bounds.violated_by(reading.value))
    }

    fn checked_bounds(&self, reading: &Reading) -> Result<&SignalBounds> {
        let bounds = match self.config.bounds_for(&reading.signal_name) {
            Some(bounds) if self.config.is_allowed(&reading.signal_name) => bounds,
            _ => {
                debug!(
                    entity = %reading.entity_id,
                    signal = %reading.signal_name,
                    "Rejected reading for unsupported signal"
                );
                return Err(EngineError::UnsupportedSignal(reading.signal_name.clone()));
            }
        };

        if !reading.value.is_finite() {
            debug!(
                entity = %reading.entity_id,
                signal = %reading.signal_name,
                "Rejected non-finite reading"
            );
            return Err(EngineError::NonFiniteValue {
                signal: reading.signal_name.clone(),
                value: reading.value,
            });
        }

        Ok(bounds)
    }

    /// Process a single reading.
    ///
    /// Rejections leave every model untouched. An accepted reading mutates
    /// exactly one model, under that model's lock.
    pub fn process(&self, reading: &Reading) -> Result<AlertRecord> {
        let bounds = self.checked_bounds(reading)?;
        let static_alert = bounds.violated_by(reading.value);

        let model = self
            .registry
            .get_or_create(&reading.entity_id, &reading.signal_name);
        let anomaly_score = model.lock().score_then_learn(reading.value);

        if static_alert {
            warn!(
                entity = %reading.entity_id,
                signal = %reading.signal_name,
                value = reading.value,
                min = bounds.min,
                max = bounds.max,
                score = anomaly_score,
                "STATIC ALERT"
            );
        } else {
            debug!(
                entity = %reading.entity_id,
                signal = %reading.signal_name,
                value = reading.value,
                score = anomaly_score,
                "Scored reading"
            );
        }

        Ok(AlertRecord::from_reading(reading, static_alert, anomaly_score))
    }

    /// Process readings in order; each succeeds or fails on its own.
    pub fn process_batch(&self, readings: &[Reading]) -> Vec<Result<AlertRecord>> {
        readings.iter().map(|r| self.process(r)).collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }
}
