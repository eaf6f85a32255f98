//! Error taxonomy for the scoring engine and its configuration surface.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Reading names a signal outside the configured allow-list.
    #[error("Sensor '{0}' not allowed")]
    UnsupportedSignal(String),

    /// Reading value is NaN or infinite.
    #[error("Sensor '{signal}' reported a non-finite value ({value})")]
    NonFiniteValue { signal: String, value: f64 },

    /// Startup-time configuration problem. Never raised per reading.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to read configuration from {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the error rejects a single reading (as opposed to a fatal startup error).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedSignal(_) | Self::NonFiniteValue { .. }
        )
    }
}
