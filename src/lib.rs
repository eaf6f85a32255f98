//! Online anomaly scoring for vehicle sensor streams.
//!
//! Every reading gets a static bounds check and an adaptive anomaly score
//! from a per-(vehicle, sensor) streaming model learned online.

pub mod aggregate;
pub mod algo;
pub mod backfill;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod model;
pub mod registry;
pub mod signal;
pub mod store;

pub use aggregate::{SignalStats, summarize};
pub use backfill::{BACKFILL_BATCH, BackfillReport, backfill_batch, run_backfill};
pub use config::{EngineConfig, ModelParams, SignalBounds};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use model::StreamingModel;
pub use registry::{ModelRegistry, RegistryStats, SharedModel};
pub use signal::{AlertRecord, EntityKey, Reading};
pub use store::{ArchiveHandle, ArchiveWriter, MemoryStore, RecordSink, StoredRecord};
