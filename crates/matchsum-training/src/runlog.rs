//! Optional external run logger.
//!
//! The checkpoint callback only needs to know where a run logs to so a resumed
//! run can append to the same folder; everything else is best effort.

use crate::engine::callback::{TrainContext, TrainerCallback};
use crate::engine::state::{EvalResults, MetricValues};
use crate::error::{TrainingError, TrainingResult};
use crate::params::TrainingParams;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const HYPER_FILE: &str = "hyper.json";
pub const METRICS_FILE: &str = "metrics.jsonl";

/// Where a run logger writes.
pub trait RunLogDirs: Send + Sync {
    /// Root directory that holds run folders.
    fn log_dir(&self) -> Option<PathBuf>;

    /// Folder of the current run, once created.
    fn save_log_dir(&self) -> Option<PathBuf>;

    /// `append = true` reattaches to an existing run folder.
    fn set_log_dir(&self, dir: &Path, append: bool) -> TrainingResult<()>;
}

#[derive(Debug, Default)]
struct Dirs {
    log_dir: Option<PathBuf>,
    save_log_dir: Option<PathBuf>,
}

/// Run logger writing JSON files under `<root>/log_<YYYYMMDD_HHMMSS>/`.
#[derive(Debug, Default)]
pub struct FileRunLog {
    dirs: Mutex<Dirs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub kind: String,
    pub epoch: u32,
    pub step: u64,
    pub values: MetricValues,
}

impl FileRunLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { dirs: Mutex::new(Dirs { log_dir: Some(root.into()), save_log_dir: None }) }
    }

    fn lock(&self) -> TrainingResult<std::sync::MutexGuard<'_, Dirs>> {
        self.dirs
            .lock()
            .map_err(|_| TrainingError::RunLog("run log state poisoned".to_string()))
    }

    /// Current run folder, created on first use.
    pub fn run_dir(&self) -> TrainingResult<PathBuf> {
        let mut dirs = self.lock()?;
        if let Some(dir) = &dirs.save_log_dir {
            return Ok(dir.clone());
        }
        let root = dirs
            .log_dir
            .clone()
            .ok_or_else(|| TrainingError::RunLog("no log directory configured".to_string()))?;
        let dir = root.join(format!("log_{}", Local::now().format("%Y%m%d_%H%M%S")));
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Created run log folder");
        dirs.save_log_dir = Some(dir.clone());
        Ok(dir)
    }

    pub fn log_hyperparams(&self, params: &TrainingParams) -> TrainingResult<()> {
        let dir = self.run_dir()?;
        let contents = serde_json::to_string_pretty(params)?;
        std::fs::write(dir.join(HYPER_FILE), contents)?;
        Ok(())
    }

    pub fn log_metric(&self, record: &MetricRecord) -> TrainingResult<()> {
        let dir = self.run_dir()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(METRICS_FILE))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// All records appended to the current run folder.
    pub fn read_metrics(&self) -> TrainingResult<Vec<MetricRecord>> {
        let path = self.run_dir()?.join(METRICS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        let mut records = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

impl RunLogDirs for FileRunLog {
    fn log_dir(&self) -> Option<PathBuf> {
        self.dirs.lock().ok().and_then(|d| d.log_dir.clone())
    }

    fn save_log_dir(&self) -> Option<PathBuf> {
        self.dirs.lock().ok().and_then(|d| d.save_log_dir.clone())
    }

    fn set_log_dir(&self, dir: &Path, append: bool) -> TrainingResult<()> {
        let mut dirs = self.lock()?;
        if append {
            if !dir.is_dir() {
                return Err(TrainingError::RunLog(format!("run folder {} does not exist", dir.display())));
            }
            dirs.log_dir = dir.parent().map(Path::to_path_buf);
            dirs.save_log_dir = Some(dir.to_path_buf());
        } else {
            dirs.log_dir = Some(dir.to_path_buf());
            dirs.save_log_dir = None;
        }
        Ok(())
    }
}

/// Records hyperparameters and validation results in a `FileRunLog`.
///
/// Logging problems never abort training.
pub struct RunLogCallback {
    log: Arc<FileRunLog>,
    params: TrainingParams,
}

impl RunLogCallback {
    #[must_use]
    pub fn new(log: Arc<FileRunLog>, params: TrainingParams) -> Self {
        Self { log, params }
    }
}

impl TrainerCallback for RunLogCallback {
    fn name(&self) -> &str {
        "RunLogCallback"
    }

    fn on_train_begin(&mut self, _ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        if let Err(e) = self.log.log_hyperparams(&self.params) {
            warn!(error = %e, "Failed to record hyperparameters in run log");
        }
        Ok(())
    }

    fn on_valid_end(
        &mut self,
        ctx: &mut TrainContext<'_>,
        results: &EvalResults,
        _is_better: bool,
    ) -> TrainingResult<()> {
        for (metric, values) in results {
            let record = MetricRecord {
                kind: metric.clone(),
                epoch: ctx.state.epoch,
                step: ctx.state.step,
                values: values.clone(),
            };
            if let Err(e) = self.log.log_metric(&record) {
                warn!(error = %e, "Failed to record validation results in run log");
            }
        }
        Ok(())
    }

    fn on_train_end(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        let mut values = MetricValues::new();
        if let Some(best) = &ctx.state.best_dev {
            values.insert("best_indicator".to_string(), best.indicator);
            values.insert("best_epoch".to_string(), f64::from(best.epoch));
        }
        let record = MetricRecord { kind: "finished".to_string(), epoch: ctx.state.epoch, step: ctx.state.step, values };
        if let Err(e) = self.log.log_metric(&record) {
            warn!(error = %e, "Failed to record run completion in run log");
        }
        Ok(())
    }
}
