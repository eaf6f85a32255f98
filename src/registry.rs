//! Concurrent Model Registry
//!
//! Maps each (entity, signal) key to its own `StreamingModel`. Models are
//! created lazily on first access and live for the lifetime of the
//! registry: there is no eviction and no removal.
//!
//! Locking:
//! - the key map sits behind a `RwLock`, read-locked for lookups and
//!   write-locked only while inserting a new key
//! - every model sits behind its own `Mutex`, so readings for different keys
//!   never contend and readings for the same key are fully serialized

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::ModelParams;
use crate::model::StreamingModel;
use crate::signal::EntityKey;

/// Handle to one model. Lock it for the whole score-then-learn step.
pub type SharedModel = Arc<Mutex<StreamingModel>>;

/// Statistics about the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub models: usize,
    pub creations: u64,
    pub lookups: u64,
}

pub struct ModelRegistry {
    models: RwLock<HashMap<EntityKey, SharedModel>>,
    params: ModelParams,
    creations: AtomicU64,
    lookups: AtomicU64,
}

impl ModelRegistry {
    /// `params` are expected to be validated already.
    pub fn new(params: ModelParams) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            params,
            creations: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Existing model for the key, or a freshly built one.
    ///
    /// Callers racing on a new key all receive the same instance; the model
    /// is constructed at most once.
    pub fn get_or_create(&self, entity_id: &str, signal_name: &str) -> SharedModel {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let key = EntityKey::new(entity_id, signal_name);

        if let Some(model) = self.models.read().get(&key) {
            return Arc::clone(model);
        }

        let mut models = self.models.write();
        let model = models.entry(key).or_insert_with_key(|key| {
            self.creations.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Creating streaming model");
            Arc::new(Mutex::new(StreamingModel::new(&self.params)))
        });
        Arc::clone(model)
    }

    /// Model for the key if one exists. Never creates.
    pub fn get(&self, key: &EntityKey) -> Option<SharedModel> {
        self.models.read().get(key).cloned()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.models.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.models.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            models: self.len(),
            creations: self.creations.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(ModelParams::default())
    }
}
