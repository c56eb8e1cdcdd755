//! On-disk checkpoint envelope.
//!
//! Every checkpoint file is one JSON document:
//!
//! ```json
//! { "format_version": 1, "created_at": "...", "checkpoint": { "kind": "resumable_state", "payload": { ... } } }
//! ```
//!
//! Resumable snapshots and model artifacts share the envelope; the `kind`
//! tag tells them apart so one can never be loaded as the other.

use crate::engine::model::{ModelConfig, StateDict, SummaryModel};
use crate::engine::state::{BestDev, EvalResults};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

/// File extension of every checkpoint written by this crate.
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    ResumableState,
    ModelArtifact,
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResumableState => write!(f, "resumable_state"),
            Self::ModelArtifact => write!(f, "model_artifact"),
        }
    }
}

/// Everything needed to resume an interrupted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub model: StateDict,
    pub optimizer: serde_json::Value,
    /// Last completed epoch.
    pub epoch: u32,
    pub step: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_dev_epoch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_dev_perf: Option<EvalResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_dev_step: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_metric_indicator: Option<f64>,
    #[serde(rename = "fitlog_log_dir", default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(rename = "fitlog_save_log_dir", default, skip_serializing_if = "Option::is_none")]
    pub save_log_dir: Option<PathBuf>,
    /// Hash of the hyperparameter record the run started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_hash: Option<String>,
}

impl Snapshot {
    #[must_use]
    pub fn new(model: StateDict, optimizer: serde_json::Value, epoch: u32, step: u64) -> Self {
        Self {
            model,
            optimizer,
            epoch,
            step,
            best_dev_epoch: None,
            best_dev_perf: None,
            best_dev_step: None,
            best_metric_indicator: None,
            log_dir: None,
            save_log_dir: None,
            params_hash: None,
        }
    }

    #[must_use]
    pub fn with_best_dev(mut self, best: &BestDev) -> Self {
        self.best_dev_epoch = Some(best.epoch);
        self.best_dev_perf = Some(best.perf.clone());
        self.best_dev_step = Some(best.step);
        self.best_metric_indicator = Some(best.indicator);
        self
    }

    /// Best-dev marker, present only when `best_dev_epoch` was recorded.
    /// Missing companion fields fall back to neutral values.
    #[must_use]
    pub fn best_dev(&self) -> Option<BestDev> {
        let epoch = self.best_dev_epoch?;
        Some(BestDev {
            epoch,
            step: self.best_dev_step.unwrap_or_default(),
            perf: self.best_dev_perf.clone().unwrap_or_default(),
            indicator: self.best_metric_indicator.unwrap_or(f64::NEG_INFINITY),
        })
    }

    /// Run folder to reattach to: the per-run folder if known, else the root.
    #[must_use]
    pub fn recovered_log_dir(&self) -> Option<&Path> {
        self.save_log_dir.as_deref().or(self.log_dir.as_deref())
    }
}

/// Inference-ready model, as written by the save-best callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub config: ModelConfig,
    pub model: StateDict,
    pub epoch: u32,
    pub step: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
}

impl ModelArtifact {
    #[must_use]
    pub fn from_model(model: &dyn SummaryModel, epoch: u32, step: u64) -> Self {
        Self {
            config: model.config().clone(),
            model: model.state_dict().clone(),
            epoch,
            step,
            metric_key: None,
            metric_value: None,
        }
    }

    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metric_key = Some(key.into());
        self.metric_value = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CheckpointPayload {
    ResumableState(Snapshot),
    ModelArtifact(ModelArtifact),
}

impl CheckpointPayload {
    #[must_use]
    pub fn kind(&self) -> CheckpointKind {
        match self {
            Self::ResumableState(_) => CheckpointKind::ResumableState,
            Self::ModelArtifact(_) => CheckpointKind::ModelArtifact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub checkpoint: CheckpointPayload,
}

impl CheckpointFile {
    #[must_use]
    pub fn new(checkpoint: CheckpointPayload) -> Self {
        Self { format_version: FORMAT_VERSION, created_at: Utc::now(), checkpoint }
    }
}

/// Read before the full document so version mismatches get a precise error.
#[derive(Debug, Deserialize)]
pub(crate) struct CheckpointHeader {
    pub format_version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::Tensor;

    fn snapshot() -> Snapshot {
        let mut model = StateDict::new();
        model.insert("w".to_string(), Tensor::vector(vec![0.5], true));
        Snapshot::new(model, serde_json::json!({"lr": 0.0}), 5, 120)
    }

    #[test]
    fn test_envelope_is_tagged_by_kind() {
        let file = CheckpointFile::new(CheckpointPayload::ResumableState(snapshot()));
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["format_version"], FORMAT_VERSION);
        assert_eq!(json["checkpoint"]["kind"], "resumable_state");
        assert_eq!(json["checkpoint"]["payload"]["epoch"], 5);
        // Absent optional keys are not written at all.
        assert!(json["checkpoint"]["payload"].get("best_dev_epoch").is_none());
    }

    #[test]
    fn test_snapshot_tolerates_missing_optional_keys() {
        let json = serde_json::json!({
            "model": {},
            "optimizer": null,
            "epoch": 2,
            "step": 10
        });
        let snapshot: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(snapshot.epoch, 2);
        assert!(snapshot.best_dev().is_none());
        assert!(snapshot.recovered_log_dir().is_none());
    }

    #[test]
    fn test_best_dev_round_trip_through_snapshot() {
        let mut perf = EvalResults::new();
        perf.insert("ValidMetric".to_string(), [("ROUGE".to_string(), 0.4)].into_iter().collect());
        let best = BestDev { epoch: 3, step: 90, perf, indicator: 0.4 };
        let restored = snapshot().with_best_dev(&best).best_dev().unwrap();
        assert_eq!(restored, best);
    }

    #[test]
    fn test_save_log_dir_wins_over_log_dir() {
        let mut snap = snapshot();
        snap.log_dir = Some(PathBuf::from("/logs"));
        assert_eq!(snap.recovered_log_dir(), Some(Path::new("/logs")));
        snap.save_log_dir = Some(PathBuf::from("/logs/log_20240101_000000"));
        assert_eq!(snap.recovered_log_dir(), Some(Path::new("/logs/log_20240101_000000")));
    }

    #[test]
    fn test_run_log_keys_use_fitlog_names() {
        let mut snap = snapshot();
        snap.log_dir = Some(PathBuf::from("/logs"));
        snap.save_log_dir = Some(PathBuf::from("/logs/log_20240101_000000"));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["fitlog_log_dir"], "/logs");
        assert_eq!(json["fitlog_save_log_dir"], "/logs/log_20240101_000000");
        assert!(json.get("log_dir").is_none());

        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back.recovered_log_dir(), Some(Path::new("/logs/log_20240101_000000")));
    }
}
