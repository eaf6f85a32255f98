//! HTTP ingestion gateway
//!
//! Endpoints:
//! - `POST /sensor`   one reading or an array of readings
//! - `GET  /data`     stored records, optionally for one vehicle
//! - `DELETE /data`   drop every stored record
//! - `GET  /stats`    min/max/average/alerts for one vehicle and sensor
//! - `GET  /metrics`  Prometheus exposition
//! - `GET  /health`

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use prometheus::{Counter, Encoder, Gauge, Histogram, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use tracing::{debug, warn};

use crate::aggregate::{SignalStats, summarize};
use crate::engine::Engine;
use crate::signal::Reading;
use crate::store::{ArchiveHandle, RecordSink, StoredRecord};

// ============================================================================
// METRICS
// ============================================================================

pub static READINGS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("fleetwatch_readings_total", "Total sensor readings received")
        .expect("valid metric");
    registered(c)
});

pub static REJECTED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "fleetwatch_rejected_total",
        "Readings rejected before scoring (unsupported sensor or bad value)",
    )
    .expect("valid metric");
    registered(c)
});

pub static STATIC_ALERTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "fleetwatch_static_alerts_total",
        "Readings outside their configured bounds",
    )
    .expect("valid metric");
    registered(c)
});

pub static ARCHIVE_DROPPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "fleetwatch_archive_dropped_total",
        "Records not archived due to backpressure",
    )
    .expect("valid metric");
    registered(c)
});

pub static PROCESSING_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "fleetwatch_processing_duration_seconds",
        "Histogram of per-reading processing latency",
    ))
    .expect("valid metric");
    registered(h)
});

pub static ACTIVE_MODELS: Lazy<Gauge> = Lazy::new(|| {
    let g = Gauge::new("fleetwatch_active_models", "Number of (vehicle, sensor) models")
        .expect("valid metric");
    registered(g)
});

/// Register `metric` with the default registry. A failed registration is
/// logged and the metric is still returned, so updates keep working even
/// though it will be missing from `/metrics`.
fn registered<C>(metric: C) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    if let Err(e) = prometheus::register(Box::new(metric.clone())) {
        let names: Vec<String> = metric
            .desc()
            .iter()
            .map(|d| d.fq_name.clone())
            .collect();
        warn!(metrics = ?names, error = %e, "Failed to register metric");
    }
    metric
}

/// Force registration so every metric shows up before its first update.
pub fn init_metrics() {
    let _ = &*READINGS_TOTAL;
    let _ = &*REJECTED_TOTAL;
    let _ = &*STATIC_ALERTS_TOTAL;
    let _ = &*ARCHIVE_DROPPED_TOTAL;
    let _ = &*PROCESSING_LATENCY;
    let _ = &*ACTIVE_MODELS;
}

// ============================================================================
// DATA TYPES
// ============================================================================

/// Wire shape of one reading.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SensorPayload {
    pub vehicle_id: String,
    pub sensor: String,
    pub value: f64,
    /// Defaults to the time of receipt
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SensorPayload {
    pub fn into_reading(self, received_at: DateTime<Utc>) -> Reading {
        Reading::new(
            self.vehicle_id,
            self.sensor,
            self.value,
            self.timestamp.unwrap_or(received_at),
        )
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum SensorBody {
    Many(Vec<SensorPayload>),
    One(SensorPayload),
}

impl SensorBody {
    fn into_vec(self) -> Vec<SensorPayload> {
        match self {
            Self::Many(v) => v,
            Self::One(p) => vec![p],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Rejection {
    pub index: usize,
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IngestResponse {
    /// Stored rows; `anomaly_score` is null until backfilled in deferred mode
    pub records: Vec<StoredRecord>,
    pub rejected: Vec<Rejection>,
}

#[derive(Deserialize, Debug)]
pub struct DataQuery {
    pub vehicle_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct StatsQuery {
    pub vehicle_id: String,
    pub sensor: String,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn RecordSink>,
    pub archive: Option<ArchiveHandle>,
    /// Store screened rows unscored and leave scoring to the backfill worker
    pub deferred: bool,
}

// ============================================================================
// SIMD-JSON EXTRACTOR
// ============================================================================

pub struct SimdJson<T>(pub T);

impl<T, S> FromRequest<S> for SimdJson<T>
where
    T: for<'de> Deserialize<'de> + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| e.into_response())?;
        let mut bytes_vec = bytes.to_vec();

        let val = simd_json::from_slice::<T>(&mut bytes_vec).map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "Invalid JSON" })),
            )
                .into_response()
        })?;

        Ok(SimdJson(val))
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn home() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Server running. Use /sensor to POST data and /data to GET all readings."
    }))
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn ingest_sensor(
    State(state): State<AppState>,
    SimdJson(body): SimdJson<SensorBody>,
) -> (StatusCode, Json<IngestResponse>) {
    let payloads = body.into_vec();
    READINGS_TOTAL.inc_by(payloads.len() as f64);

    let received_at = Utc::now();
    let mut response = IngestResponse::default();

    for (index, payload) in payloads.into_iter().enumerate() {
        let reading = payload.into_reading(received_at);

        let timer = PROCESSING_LATENCY.start_timer();
        let result = if state.deferred {
            state
                .engine
                .screen(&reading)
                .map(|alert| StoredRecord::pending(reading, alert))
        } else {
            state
                .engine
                .process(&reading)
                .map(|record| StoredRecord::from_alert(Uuid::new_v4(), record))
        };
        timer.observe_duration();

        match result {
            Ok(row) => {
                if row.static_alert {
                    STATIC_ALERTS_TOTAL.inc();
                }
                state.store.append_stored(row.clone());
                if let Some(archive) = &state.archive {
                    if !archive.submit(&row) {
                        ARCHIVE_DROPPED_TOTAL.inc();
                    }
                }
                response.records.push(row);
            }
            Err(e) => {
                REJECTED_TOTAL.inc();
                response.rejected.push(Rejection {
                    index,
                    error: e.to_string(),
                });
            }
        }
    }

    ACTIVE_MODELS.set(state.engine.registry().len() as f64);

    let status = if response.records.is_empty() && !response.rejected.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, Json(response))
}

async fn list_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Json<Vec<StoredRecord>> {
    Json(state.store.records(query.vehicle_id.as_deref(), query.limit))
}

async fn clear_data(State(state): State<AppState>) -> Json<serde_json::Value> {
    let deleted = state.store.clear();
    debug!(deleted, "Cleared stored records");
    Json(json!({ "deleted": deleted }))
}

async fn stats_handler(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<SignalStats>, (StatusCode, Json<serde_json::Value>)> {
    let records = state.store.records(Some(&query.vehicle_id), None);
    summarize(&records, &query.sensor).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "detail": format!("No '{}' data for vehicle '{}'", query.sensor, query.vehicle_id)
            })),
        )
    })
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/sensor", post(ingest_sensor))
        .route("/data", get(list_data).delete(clear_data))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}
