//! Deferred scoring
//!
//! In deferred mode the gateway stores screened readings without a score.
//! This worker drains them oldest first, runs each through the engine (which
//! scores and learns) and writes the score back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::store::RecordSink;

/// Rows pulled per pass
pub const BACKFILL_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub scored: usize,
    /// Rows the engine rejected; they stay unscored
    pub rejected: usize,
    /// Rows scored elsewhere between fetch and write-back
    pub conflicts: usize,
}

/// Score up to `limit` unscored rows, oldest first.
pub fn backfill_batch(engine: &Engine, store: &dyn RecordSink, limit: usize) -> BackfillReport {
    let mut report = BackfillReport::default();

    for row in store.unscored(limit) {
        match engine.process(&row.reading()) {
            Ok(record) => {
                if store.set_score(row.id, record.anomaly_score) {
                    report.scored += 1;
                } else {
                    report.conflicts += 1;
                }
            }
            Err(e) => {
                debug!(id = %row.id, error = %e, "Backfill skipped row");
                report.rejected += 1;
            }
        }
    }

    report
}

/// Poll the store forever, sleeping `idle` whenever a pass finds nothing
/// to score.
pub async fn run_backfill(engine: Arc<Engine>, store: Arc<dyn RecordSink>, idle: Duration) {
    info!(batch = BACKFILL_BATCH, idle_ms = idle.as_millis() as u64, "Backfill worker active.");

    loop {
        let report = backfill_batch(&engine, store.as_ref(), BACKFILL_BATCH);
        if report.rejected > 0 || report.conflicts > 0 {
            warn!(
                rejected = report.rejected,
                conflicts = report.conflicts,
                "Backfill left rows unscored"
            );
        }

        if report.scored == 0 {
            tokio::time::sleep(idle).await;
        } else {
            debug!(scored = report.scored, "Backfill pass complete");
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::signal::{EntityKey, Reading};
    use crate::store::{MemoryStore, StoredRecord};

    fn pending(store: &MemoryStore, engine: &Engine, signal: &str, value: f64) {
        let reading = Reading::now("CAR001", signal, value);
        let alert = engine.screen(&reading).unwrap_or(false);
        store.append_stored(StoredRecord::pending(reading, alert));
    }

    #[test]
    fn test_scores_pending_rows_in_batches() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let store = MemoryStore::new();
        for i in 0..250 {
            pending(&store, &engine, "Engine RPMs", 2000.0 + i as f64);
        }
        assert!(engine.registry().is_empty());

        let first = backfill_batch(&engine, &store, BACKFILL_BATCH);
        assert_eq!(first.scored, 100);
        assert_eq!(store.unscored(usize::MAX).len(), 150);

        backfill_batch(&engine, &store, BACKFILL_BATCH);
        let last = backfill_batch(&engine, &store, BACKFILL_BATCH);
        assert_eq!(last.scored, 50);
        assert_eq!(backfill_batch(&engine, &store, BACKFILL_BATCH), BackfillReport::default());

        let model = engine
            .registry()
            .get(&EntityKey::new("CAR001", "Engine RPMs"))
            .unwrap();
        assert_eq!(model.lock().observations(), 250);
        assert!(store
            .records(None, None)
            .iter()
            .all(|r| r.anomaly_score.is_some_and(|s| (0.0..=1.0).contains(&s))));
    }

    #[test]
    fn test_rejected_rows_stay_unscored() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let store = MemoryStore::new();
        pending(&store, &engine, "Unknown Sensor", 1.0);
        pending(&store, &engine, "Fuel trim", 0.5);

        let report = backfill_batch(&engine, &store, BACKFILL_BATCH);
        assert_eq!(report.scored, 1);
        assert_eq!(report.rejected, 1);

        let left = store.unscored(10);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].signal_name, "Unknown Sensor");
    }
}
