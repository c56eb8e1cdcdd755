use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Values reported by one metric, keyed by value name (e.g. `ROUGE`).
pub type MetricValues = BTreeMap<String, f64>;

/// Results of one evaluation pass, keyed by metric name.
pub type EvalResults = BTreeMap<String, MetricValues>;

/// Best validation performance observed so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestDev {
    pub epoch: u32,
    pub step: u64,
    pub perf: EvalResults,
    /// Value of the selection metric key; larger is better.
    pub indicator: f64,
}

/// Progress counters owned by the trainer.
#[derive(Debug, Clone)]
pub struct RunState {
    /// 1-based epoch currently running.
    pub epoch: u32,
    /// Batches processed since the start of the run.
    pub step: u64,
    pub n_epochs: u32,
    pub update_every: u64,
    pub metric_key: String,
    pub best_dev: Option<BestDev>,
    pub last_loss: Option<f32>,
}

impl RunState {
    #[must_use]
    pub fn new(n_epochs: u32, update_every: u64, metric_key: impl Into<String>) -> Self {
        Self {
            epoch: 1,
            step: 0,
            n_epochs,
            update_every: update_every.max(1),
            metric_key: metric_key.into(),
            best_dev: None,
            last_loss: None,
        }
    }
}

/// Look up `key` across all metrics of an evaluation.
#[must_use]
pub fn find_indicator(results: &EvalResults, key: &str) -> Option<f64> {
    results.values().find_map(|values| values.get(key).copied())
}
