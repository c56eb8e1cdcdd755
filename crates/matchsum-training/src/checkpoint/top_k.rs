use crate::checkpoint::format::{ModelArtifact, CHECKPOINT_EXTENSION};
use crate::checkpoint::store::CheckpointStore;
use crate::engine::callback::{TrainContext, TrainerCallback};
use crate::engine::state::{find_indicator, EvalResults};
use crate::error::TrainingResult;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
struct Kept {
    value: f64,
    path: PathBuf,
}

/// Keeps the `top` best model artifacts in `save_dir`, ranked by `metric_key`
/// (larger is better).
pub struct SaveBestModels {
    save_dir: PathBuf,
    top: usize,
    metric_key: String,
    kept: Vec<Kept>,
}

impl SaveBestModels {
    #[must_use]
    pub fn new(save_dir: impl Into<PathBuf>, top: usize, metric_key: impl Into<String>) -> Self {
        Self { save_dir: save_dir.into(), top, metric_key: metric_key.into(), kept: Vec::new() }
    }

    #[must_use]
    pub fn file_name(&self, epoch: u32, step: u64, value: f64) -> String {
        format!("epoch-{epoch}_step-{step}_{}-{value:.6}.{CHECKPOINT_EXTENSION}", self.metric_key)
    }

    /// Paths currently kept, best first.
    #[must_use]
    pub fn kept(&self) -> Vec<&Path> {
        self.kept.iter().map(|k| k.path.as_path()).collect()
    }

    fn sort(&mut self) {
        self.kept.sort_by(|a, b| b.value.total_cmp(&a.value));
    }

    /// Pick up artifacts a previous (interrupted) run left behind.
    fn scan(&mut self) {
        let Ok(entries) = std::fs::read_dir(&self.save_dir) else {
            return;
        };
        for path in entries.filter_map(Result::ok).map(|e| e.path()) {
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            if self.kept.iter().any(|k| k.path == path) {
                continue;
            }
            match CheckpointStore::new(&path).load_model_artifact() {
                Ok(artifact) if artifact.metric_key.as_deref() == Some(self.metric_key.as_str()) => {
                    if let Some(value) = artifact.metric_value {
                        self.kept.push(Kept { value, path });
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping non-artifact file"),
            }
        }
        self.sort();
    }
}

impl TrainerCallback for SaveBestModels {
    fn name(&self) -> &str {
        "SaveBestModels"
    }

    fn on_train_begin(&mut self, _ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        if self.top > 0 {
            self.scan();
            if !self.kept.is_empty() {
                info!(count = self.kept.len(), "Found model artifacts from an earlier run");
            }
        }
        Ok(())
    }

    fn on_valid_end(
        &mut self,
        ctx: &mut TrainContext<'_>,
        results: &EvalResults,
        _is_better: bool,
    ) -> TrainingResult<()> {
        if self.top == 0 {
            return Ok(());
        }
        let Some(value) = find_indicator(results, &self.metric_key) else {
            return Ok(());
        };
        let full = self.kept.len() >= self.top;
        if full && self.kept.last().is_some_and(|worst| value <= worst.value) {
            return Ok(());
        }

        let path = self.save_dir.join(self.file_name(ctx.state.epoch, ctx.state.step, value));
        let artifact = ModelArtifact::from_model(&*ctx.model, ctx.state.epoch, ctx.state.step)
            .with_metric(self.metric_key.clone(), value);
        CheckpointStore::new(&path).save_model_artifact(artifact)?;
        info!(path = %path.display(), value, "Saved model artifact");

        self.kept.retain(|k| k.path != path);
        self.kept.push(Kept { value, path });
        self.sort();
        while self.kept.len() > self.top {
            if let Some(evicted) = self.kept.pop() {
                CheckpointStore::new(&evicted.path).delete()?;
                debug!(path = %evicted.path.display(), value = evicted.value, "Evicted model artifact");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{MatchScorer, ModelConfig, SummaryModel};
    use crate::engine::optim::Adam;
    use crate::engine::state::RunState;
    use tempfile::TempDir;

    fn results(value: f64) -> EvalResults {
        let mut results = EvalResults::new();
        results.insert("ValidMetric".to_string(), [("ROUGE".to_string(), value)].into_iter().collect());
        results
    }

    #[test]
    fn test_keeps_only_best_n() {
        let temp = TempDir::new().unwrap();
        let mut saver = SaveBestModels::new(temp.path(), 2, "ROUGE");
        let mut model = MatchScorer::new(ModelConfig { encoder: "bert".to_string(), candidate_num: 2 });
        let mut optimizer = Adam::new(0.0, model.trainable_parameters());
        let mut state = RunState::new(3, 1, "ROUGE");

        for (step, value) in [(1, 0.3), (2, 0.5), (3, 0.1), (4, 0.4)] {
            state.step = step;
            let mut ctx = TrainContext { model: &mut model, optimizer: &mut optimizer, state: &mut state };
            saver.on_valid_end(&mut ctx, &results(value), false).unwrap();
        }

        let kept: Vec<String> = saver
            .kept()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(kept, vec!["epoch-1_step-2_ROUGE-0.500000.ckpt", "epoch-1_step-4_ROUGE-0.400000.ckpt"]);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 2);

        let artifact = CheckpointStore::new(saver.kept()[0]).load_model_artifact().unwrap();
        assert_eq!(artifact.metric_value, Some(0.5));
        assert_eq!(&artifact.model, model.state_dict());
    }

    #[test]
    fn test_scan_counts_existing_artifacts() {
        let temp = TempDir::new().unwrap();
        let model = MatchScorer::new(ModelConfig { encoder: "bert".to_string(), candidate_num: 2 });
        let earlier = SaveBestModels::new(temp.path(), 1, "ROUGE");
        let path = temp.path().join(earlier.file_name(1, 5, 0.9));
        CheckpointStore::new(&path)
            .save_model_artifact(ModelArtifact::from_model(&model, 1, 5).with_metric("ROUGE", 0.9))
            .unwrap();
        std::fs::write(temp.path().join("notes.ckpt"), "garbage").unwrap();

        let mut saver = SaveBestModels::new(temp.path(), 1, "ROUGE");
        saver.scan();
        assert_eq!(saver.kept(), vec![path.as_path()]);
    }
}
