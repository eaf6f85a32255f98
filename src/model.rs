//! Per-(entity, signal) streaming model: standardize, score, learn.

use crate::algo::hst::PartitionEnsemble;
use crate::algo::moments::RunningMoments;
use crate::config::ModelParams;

/// One running-moment estimator paired with one partition ensemble.
#[derive(Clone, Debug)]
pub struct StreamingModel {
    moments: RunningMoments,
    ensemble: PartitionEnsemble,
}

impl StreamingModel {
    pub fn new(params: &ModelParams) -> Self {
        let tree_height = params.tree_height;
        let ensemble = match params.feature_range {
            Some([lo, hi]) => PartitionEnsemble::with_range(
                1,
                params.tree_count,
                tree_height,
                params.window_size,
                params.random_seed,
                (lo, hi),
            ),
            None => PartitionEnsemble::bootstrapped(
                1,
                params.tree_count,
                tree_height,
                params.window_size,
                params.random_seed,
            ),
        };

        Self {
            moments: RunningMoments::new(),
            ensemble,
        }
    }

    /// Score `raw_value` and absorb it.
    ///
    /// The value is standardized against the statistics from before it
    /// arrived, so it never contributes to its own z-score.
    pub fn score_then_learn(&mut self, raw_value: f64) -> f64 {
        let z = self.moments.standardize(raw_value);
        let score = self.ensemble.score_then_learn(&[z]);
        self.moments.update(raw_value);
        score
    }

    /// Observations absorbed so far
    pub fn observations(&self) -> u64 {
        self.moments.count()
    }

    pub fn moments(&self) -> &RunningMoments {
        &self.moments
    }

    pub fn ensemble(&self) -> &PartitionEnsemble {
        &self.ensemble
    }
}
