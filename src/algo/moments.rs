use serde::{Deserialize, Serialize};

/// Running mean/variance via Welford's recurrence.
///
/// `standardize` reads the statistics as they are; callers that need
/// pre-update standardization must call it before `update`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RunningMoments {
    count: u64,
    mean: f64,
    sum_sq_dev: f64,
}

impl RunningMoments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_sq_dev += delta * (value - self.mean);
    }

    /// z-score of `value` against the current statistics.
    ///
    /// Returns 0.0 with fewer than two observations or zero variance.
    pub fn standardize(&self, value: f64) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let std_dev = self.std_dev();
        if std_dev <= 0.0 || !std_dev.is_finite() {
            return 0.0;
        }
        (value - self.mean) / std_dev
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sum_sq_dev(&self) -> f64 {
        self.sum_sq_dev
    }

    /// Sample variance (n - 1 denominator, floored at 1)
    pub fn variance(&self) -> f64 {
        let denom = self.count.saturating_sub(1).max(1) as f64;
        self.sum_sq_dev / denom
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}
