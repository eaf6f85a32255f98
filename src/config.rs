//! Engine configuration: signal allow-list, static bounds and model parameters.
//!
//! Loaded once at startup. `validate` runs before any registry exists, so a
//! bad configuration never reaches the per-reading path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Deepest tree the engine will build (2^13 - 1 nodes per tree)
pub const MAX_TREE_HEIGHT: u32 = 12;

/// Node budget for one model across all of its trees
pub const MAX_NODES_PER_MODEL: usize = 1 << 18;

/// Static acceptable range for one signal, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalBounds {
    pub min: f64,
    pub max: f64,
}

impl SignalBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True when `value` lies outside `[min, max]`
    pub fn violated_by(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}

/// Parameters every new streaming model is built with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub tree_count: usize,
    pub tree_height: u32,
    /// Points per mass window (also the bootstrap length)
    pub window_size: u64,
    pub random_seed: u64,
    /// Fixed construction range for standardized values. `None` derives
    /// it from the first window.
    pub feature_range: Option<[f64; 2]>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            tree_count: 25,
            tree_height: 5,
            window_size: 250,
            random_seed: 42,
            feature_range: None,
        }
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<()> {
        if self.tree_count == 0 {
            return Err(invalid("tree_count must be positive"));
        }
        if self.tree_height == 0 {
            return Err(invalid("tree_height must be positive"));
        }
        if self.tree_height > MAX_TREE_HEIGHT {
            return Err(invalid(format!(
                "tree_height {} exceeds maximum of {}",
                self.tree_height, MAX_TREE_HEIGHT
            )));
        }
        if self.nodes_per_model() > MAX_NODES_PER_MODEL {
            return Err(invalid(format!(
                "{} trees of height {} need {} nodes per model, limit is {}",
                self.tree_count,
                self.tree_height,
                self.nodes_per_model(),
                MAX_NODES_PER_MODEL
            )));
        }
        if self.window_size == 0 {
            return Err(invalid("window_size must be positive"));
        }
        if let Some([lo, hi]) = self.feature_range {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(invalid(format!(
                    "feature_range [{}, {}] must be finite with lo < hi",
                    lo, hi
                )));
            }
        }
        Ok(())
    }

    /// Arena size of one model: `tree_count` complete trees of `tree_height`.
    pub fn nodes_per_model(&self) -> usize {
        let height = self.tree_height.min(MAX_TREE_HEIGHT + 1);
        self.tree_count.saturating_mul((1usize << (height + 1)) - 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub allowed_signals: BTreeSet<String>,
    pub signal_bounds: BTreeMap<String, SignalBounds>,
    pub model: ModelParams,
}

impl Default for EngineConfig {
    /// The nine OBD sensors and their nominal operating ranges.
    fn default() -> Self {
        let specs = [
            ("Battery voltage", 11.5, 14.5),
            ("Fuel trim", -10.0, 10.0),
            ("Alternator output", 13.0, 15.0),
            ("Misfire count", 0.0, 5.0),
            ("Engine RPMs", 800.0, 6000.0),
            ("Engine run time", 0.0, 7200.0),
            ("Coolant temperature", 70.0, 105.0),
            ("Engine oil temperature", 70.0, 120.0),
            ("Transmission oil temperature", 70.0, 120.0),
        ];

        Self {
            allowed_signals: specs.iter().map(|(name, _, _)| name.to_string()).collect(),
            signal_bounds: specs
                .iter()
                .map(|(name, min, max)| (name.to_string(), SignalBounds::new(*min, *max)))
                .collect(),
            model: ModelParams::default(),
        }
    }
}

impl EngineConfig {
    /// Config allowing exactly the signals in `bounds`.
    pub fn with_bounds<I, S>(bounds: I, model: ModelParams) -> Self
    where
        I: IntoIterator<Item = (S, SignalBounds)>,
        S: Into<String>,
    {
        let signal_bounds: BTreeMap<String, SignalBounds> =
            bounds.into_iter().map(|(s, b)| (s.into(), b)).collect();
        Self {
            allowed_signals: signal_bounds.keys().cloned().collect(),
            signal_bounds,
            model,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.allowed_signals.is_empty() {
            return Err(invalid("allowed_signals is empty"));
        }
        for signal in &self.allowed_signals {
            let bounds = self
                .signal_bounds
                .get(signal)
                .ok_or_else(|| invalid(format!("no bounds configured for '{}'", signal)))?;
            if !bounds.min.is_finite() || !bounds.max.is_finite() || bounds.min > bounds.max {
                return Err(invalid(format!(
                    "bounds for '{}' must be finite with min <= max, got [{}, {}]",
                    signal, bounds.min, bounds.max
                )));
            }
        }
        self.model.validate()
    }

    pub fn is_allowed(&self, signal: &str) -> bool {
        self.allowed_signals.contains(signal)
    }

    pub fn bounds_for(&self, signal: &str) -> Option<&SignalBounds> {
        self.signal_bounds.get(signal)
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfiguration(msg.into())
}
