use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Hyperparameters of a training run.
///
/// Serialized once at training start as `params.json`; the key set is exactly
/// the field set below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub encoder: String,
    pub candidate_num: usize,
    pub batch_size: usize,
    pub accum_count: u64,
    pub max_lr: f64,
    pub margin: f64,
    pub warmup_steps: u64,
    pub n_epochs: u32,
    pub valid_steps: u64,
    pub checkpoint_file: Option<PathBuf>,
    pub use_validation_metric_for_testing: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            encoder: "bert".to_string(),
            candidate_num: 20,
            batch_size: 16,
            accum_count: 2,
            max_lr: 2e-5,
            margin: 0.01,
            warmup_steps: 10_000,
            n_epochs: 5,
            valid_steps: 1000,
            checkpoint_file: None,
            use_validation_metric_for_testing: false,
        }
    }
}

impl TrainingParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.encoder.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("encoder is required".to_string()));
        }
        if self.candidate_num == 0 {
            return Err(TrainingError::InvalidSpec("candidate_num must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if self.accum_count == 0 {
            return Err(TrainingError::InvalidSpec("accum_count must be >= 1".to_string()));
        }
        if !self.max_lr.is_finite() || self.max_lr <= 0.0 {
            return Err(TrainingError::InvalidSpec("max_lr must be > 0".to_string()));
        }
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(TrainingError::InvalidSpec("margin must be >= 0".to_string()));
        }
        if self.warmup_steps == 0 {
            return Err(TrainingError::InvalidSpec("warmup_steps must be >= 1".to_string()));
        }
        if self.n_epochs == 0 {
            return Err(TrainingError::InvalidSpec("n_epochs must be >= 1".to_string()));
        }
        Ok(())
    }

    /// Write the record as 4-space indented JSON.
    pub fn write_record(&self, path: &Path) -> TrainingResult<()> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        std::fs::write(path, out)?;
        Ok(())
    }

    pub fn read_record(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Stable content hash, stored in snapshots to detect a resume with
    /// different hyperparameters.
    pub fn content_hash(&self) -> TrainingResult<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}
