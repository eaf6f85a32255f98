//! Alert-record sink
//!
//! The engine never persists anything itself. Callers hand each
//! `AlertRecord` to a `RecordSink` after `Engine::process` returns.
//!
//! Two sinks live here:
//! - `MemoryStore`: queryable in-memory rows backing the read API, optionally
//!   capped with oldest-first eviction
//! - `ArchiveWriter`: append-only JSON-lines files on a background thread,
//!   rotated hourly

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::signal::{AlertRecord, Reading};

/// A persisted alert record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub entity_id: String,
    pub signal_name: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    pub static_alert: bool,
    /// `None` for rows written without a score
    pub anomaly_score: Option<f64>,
}

impl StoredRecord {
    /// Row for a screened reading whose score is filled in later.
    pub fn pending(reading: Reading, static_alert: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: reading.entity_id,
            signal_name: reading.signal_name,
            value: reading.value,
            observed_at: reading.observed_at,
            static_alert,
            anomaly_score: None,
        }
    }

    pub fn reading(&self) -> Reading {
        Reading::new(
            self.entity_id.clone(),
            self.signal_name.clone(),
            self.value,
            self.observed_at,
        )
    }

    pub fn from_alert(id: Uuid, record: AlertRecord) -> Self {
        Self {
            id,
            entity_id: record.entity_id,
            signal_name: record.signal_name,
            value: record.value,
            observed_at: record.observed_at,
            static_alert: record.static_alert,
            anomaly_score: Some(record.anomaly_score),
        }
    }
}

/// Outbound persistence boundary.
pub trait RecordSink: Send + Sync {
    /// Store a scored record and return its id
    fn append(&self, record: AlertRecord) -> Uuid;

    /// Store a row as-is (scored or not)
    fn append_stored(&self, record: StoredRecord);

    /// Records in insertion order, optionally for one entity, keeping only
    /// the most recent `limit`
    fn records(&self, entity_id: Option<&str>, limit: Option<usize>) -> Vec<StoredRecord>;

    /// Oldest rows still missing a score
    fn unscored(&self, limit: usize) -> Vec<StoredRecord>;

    /// Fill in a missing score. Scores are write-once: false if the id is
    /// unknown or the row already carries one.
    fn set_score(&self, id: Uuid, score: f64) -> bool;

    /// Remove everything, returning how many rows were dropped
    fn clear(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<VecDeque<StoredRecord>>,
    /// Oldest rows are evicted beyond this many
    max_rows: Option<usize>,
    evicted: AtomicU64,
}

impl MemoryStore {
    /// Unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `max_rows` rows (at least one).
    pub fn bounded(max_rows: usize) -> Self {
        Self {
            max_rows: Some(max_rows.max(1)),
            ..Self::default()
        }
    }

    pub fn max_rows(&self) -> Option<usize> {
        self.max_rows
    }

    /// Rows dropped to stay under `max_rows`
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn push(&self, record: StoredRecord) {
        let mut rows = self.rows.write();
        rows.push_back(record);
        if let Some(max) = self.max_rows {
            while rows.len() > max {
                rows.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl RecordSink for MemoryStore {
    fn append(&self, record: AlertRecord) -> Uuid {
        let id = Uuid::new_v4();
        self.push(StoredRecord::from_alert(id, record));
        id
    }

    fn append_stored(&self, record: StoredRecord) {
        self.push(record);
    }

    fn records(&self, entity_id: Option<&str>, limit: Option<usize>) -> Vec<StoredRecord> {
        let rows = self.rows.read();
        let matching: Vec<&StoredRecord> = rows
            .iter()
            .filter(|r| entity_id.is_none_or(|id| r.entity_id == id))
            .collect();
        let skip = limit.map_or(0, |n| matching.len().saturating_sub(n));
        matching.into_iter().skip(skip).cloned().collect()
    }

    fn unscored(&self, limit: usize) -> Vec<StoredRecord> {
        let mut rows: Vec<StoredRecord> = self
            .rows
            .read()
            .iter()
            .filter(|r| r.anomaly_score.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.observed_at);
        rows.truncate(limit);
        rows
    }

    fn set_score(&self, id: Uuid, score: f64) -> bool {
        match self
            .rows
            .write()
            .iter_mut()
            .find(|r| r.id == id && r.anomaly_score.is_none())
        {
            Some(row) => {
                row.anomaly_score = Some(score);
                true
            }
            None => false,
        }
    }

    fn clear(&self) -> usize {
        let mut rows = self.rows.write();
        let removed = rows.len();
        rows.clear();
        removed
    }

    fn len(&self) -> usize {
        self.rows.read().len()
    }
}

// ============================================================================
// ARCHIVE
// ============================================================================

/// Cheap, cloneable sender side of an `ArchiveWriter`.
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl ArchiveHandle {
    /// Queue one record. Never blocks; returns false when the line was
    /// dropped because the queue is full or the writer is gone.
    pub fn submit<T: Serialize>(&self, record: &T) -> bool {
        let line = match serde_json::to_string(record) {
            Ok(json) => json + "\n",
            Err(e) => {
                warn!(error = %e, "Failed to encode archive record");
                return false;
            }
        };

        match self.tx.try_send(line) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
    /// Handle whose queue nobody drains
    #[cfg(test)]
    pub(crate) fn stalled(capacity: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = bounded(capacity);
        let handle = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (handle, rx)
    }
}

/// Background JSON-lines writer with hourly file rotation.
pub struct ArchiveWriter {
    handle: ArchiveHandle,
    thread: thread::JoinHandle<()>,
}

impl ArchiveWriter {
    /// Start the writer thread. Files land in `dir` as `alerts_YYYYMMDDHH.jsonl`.
    pub fn spawn(dir: impl Into<PathBuf>, capacity: usize) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let hour = current_hour();
        let writer = open_hour_file(&dir, &hour)?;

        let (tx, rx) = bounded::<String>(capacity.max(1));
        let thread = thread::Builder::new()
            .name("fleetwatch-archive".into())
            .spawn(move || run_archive(rx, dir, hour, writer))?;

        Ok(Self {
            handle: ArchiveHandle {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            thread,
        })
    }

    pub fn handle(&self) -> ArchiveHandle {
        self.handle.clone()
    }

    /// Close this writer's sender and wait for the queue to drain.
    ///
    /// Handles cloned out of the writer must be dropped first, otherwise
    /// this waits for them.
    pub fn shutdown(self) {
        let dropped = self.handle.dropped();
        if dropped > 0 {
            warn!(dropped, "Archive queue overflowed during this run");
        }
        drop(self.handle);
        if self.thread.join().is_err() {
            error!("Archive writer panicked");
        }
    }
}

fn run_archive(rx: Receiver<String>, dir: PathBuf, mut hour: String, mut writer: BufWriter<File>) {
    info!(dir = %dir.display(), "Archive writer active.");

    while let Ok(line) = rx.recv() {
        let now_hour = current_hour();
        if now_hour != hour {
            match open_hour_file(&dir, &now_hour) {
                Ok(next) => {
                    let _ = writer.flush();
                    writer = next;
                    hour = now_hour;
                }
                Err(e) => error!(error = %e, "Failed to rotate archive file"),
            }
        }

        if let Err(e) = writer.write_all(line.as_bytes()) {
            warn!(error = %e, "Archive write failed");
        }
    }

    let _ = writer.flush();
    info!("Archive writer stopped.");
}

fn current_hour() -> String {
    Utc::now().format("%Y%m%d%H").to_string()
}

fn open_hour_file(dir: &Path, hour: &str) -> std::io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("alerts_{}.jsonl", hour)))?;
    Ok(BufWriter::with_capacity(128 * 1024, file))
}
