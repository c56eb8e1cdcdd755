use crate::checkpoint::format::Snapshot;
use crate::checkpoint::store::CheckpointStore;
use crate::engine::callback::{TrainContext, TrainerCallback};
use crate::error::TrainingResult;
use crate::runlog::RunLogDirs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    /// Remove the snapshot once training completes successfully.
    pub delete_when_train_finish: bool,
    /// Reattach the run logger to the folder recorded in the snapshot.
    pub recover_run_log: bool,
    /// Hash of the current hyperparameter record, stored in each snapshot.
    pub params_hash: Option<String>,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self { delete_when_train_finish: true, recover_run_log: true, params_hash: None }
    }
}

/// Resumes an interrupted run from a snapshot and refreshes that snapshot at
/// the end of every epoch.
pub struct CheckpointCallback {
    store: CheckpointStore,
    options: CheckpointOptions,
    run_log: Option<Arc<dyn RunLogDirs>>,
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(rest),
        Err(_) => path.to_path_buf(),
    }
}

impl CheckpointCallback {
    /// Never fails: problems reattaching the run logger are only logged.
    pub fn new(
        save_path: impl AsRef<Path>,
        options: CheckpointOptions,
        run_log: Option<Arc<dyn RunLogDirs>>,
    ) -> Self {
        let expanded = expand_home(save_path.as_ref());
        let path = std::path::absolute(&expanded).unwrap_or(expanded);
        let store = CheckpointStore::new(path);

        let run_log = if options.recover_run_log { run_log } else { None };
        let callback = Self { store, options, run_log };

        if callback.store.exists() {
            info!(path = %callback.store.path().display(), "Training will resume from snapshot");
            if let Some(run_log) = &callback.run_log {
                if let Err(e) = recover_run_log(&callback.store, run_log.as_ref()) {
                    warn!(error = %e, "Could not reattach run log to the interrupted run");
                }
            }
        }
        callback
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    #[must_use]
    pub fn recovers_run_log(&self) -> bool {
        self.run_log.is_some()
    }

    fn snapshot(&self, ctx: &TrainContext<'_>) -> TrainingResult<Snapshot> {
        let mut snapshot = Snapshot::new(
            ctx.model.state_dict().clone(),
            ctx.optimizer.state_dict()?,
            ctx.state.epoch,
            ctx.state.step,
        );
        if let Some(best) = &ctx.state.best_dev {
            snapshot = snapshot.with_best_dev(best);
        }
        if let Some(run_log) = &self.run_log {
            snapshot.log_dir = run_log.log_dir();
            snapshot.save_log_dir = run_log.save_log_dir();
        }
        snapshot.params_hash.clone_from(&self.options.params_hash);
        Ok(snapshot)
    }
}

fn recover_run_log(store: &CheckpointStore, run_log: &dyn RunLogDirs) -> TrainingResult<()> {
    let snapshot = store.load_snapshot()?;
    if let Some(dir) = snapshot.recovered_log_dir() {
        run_log.set_log_dir(dir, true)?;
        info!(dir = %dir.display(), "Run log reattached");
    }
    Ok(())
}

impl TrainerCallback for CheckpointCallback {
    fn name(&self) -> &str {
        "CheckpointCallback"
    }

    fn on_train_begin(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        if !self.store.exists() {
            return Ok(());
        }
        let snapshot = self.store.load_snapshot()?;

        ctx.model.load_state_dict(snapshot.model.clone())?;
        ctx.optimizer.load_state_dict(&snapshot.optimizer)?;
        ctx.state.epoch = snapshot.epoch + 1;
        ctx.state.step = snapshot.step;
        if let Some(best) = snapshot.best_dev() {
            ctx.state.best_dev = Some(best);
        }

        if let (Some(saved), Some(current)) = (&snapshot.params_hash, &self.options.params_hash) {
            if saved != current {
                warn!(saved = %saved, current = %current, "Resuming with different hyperparameters");
            }
        }

        info!(
            path = %self.store.path().display(),
            epoch = ctx.state.epoch,
            step = ctx.state.step,
            "Restored training state"
        );
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        let snapshot = self.snapshot(ctx)?;
        self.store.save_snapshot(snapshot)?;
        info!(
            path = %self.store.path().display(),
            epoch = ctx.state.epoch,
            step = ctx.state.step,
            "Saved snapshot"
        );
        Ok(())
    }

    fn on_train_end(&mut self, _ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        if self.options.delete_when_train_finish && self.store.delete()? {
            info!(path = %self.store.path().display(), "Training finished, snapshot removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_is_expanded() {
        let Ok(home) = std::env::var("HOME") else {
            return;
        };
        assert_eq!(expand_home(Path::new("~/runs/snap.ckpt")), PathBuf::from(home).join("runs/snap.ckpt"));
        assert_eq!(expand_home(Path::new("/abs/snap.ckpt")), PathBuf::from("/abs/snap.ckpt"));
    }

    #[test]
    fn test_relative_path_is_absolutized() {
        let callback = CheckpointCallback::new("snap.ckpt", CheckpointOptions::default(), None);
        assert!(callback.path().is_absolute());
        assert!(!callback.recovers_run_log());
    }
}
