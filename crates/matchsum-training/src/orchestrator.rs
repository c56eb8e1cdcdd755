//! End-to-end train and test runs.

use crate::checkpoint::{
    CheckpointCallback, CheckpointOptions, CheckpointPayload, CheckpointStore, SaveBestModels, CHECKPOINT_EXTENSION,
};
use crate::dataset::{ensure_data_paths, MatchSumPipe};
use crate::engine::{
    Adam, BestDev, EvalResults, MarginRankingLoss, MatchScorer, Metric, ModelConfig, RougeOutputMetric, SummaryModel,
    Tester, Trainer, TrainerOptions, ValidMetric, WarmupCallback, ROUGE_KEY,
};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::{ensure_result_paths, DataLayout, Mode};
use crate::params::TrainingParams;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::runlog::{FileRunLog, RunLogCallback, RunLogDirs};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const PARAMS_FILE: &str = "params.json";
pub const SNAPSHOT_FILE: &str = "snapshot.ckpt";

/// Everything a train or test run needs beyond the hyperparameters.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub save_path: PathBuf,
    /// Comma-separated device ids; a single id in test mode.
    pub gpus: String,
    pub params: TrainingParams,
    pub data_dir: PathBuf,
    /// Defaults to `<save_path>/snapshot.ckpt`.
    pub snapshot_path: Option<PathBuf>,
    pub delete_snapshot_on_finish: bool,
    pub recover_run_log: bool,
    pub run_log_dir: Option<PathBuf>,
    pub top_k: usize,
    pub print_every: u64,
}

impl RunOptions {
    #[must_use]
    pub fn new(save_path: impl Into<PathBuf>, gpus: impl Into<String>, params: TrainingParams) -> Self {
        Self {
            save_path: save_path.into(),
            gpus: gpus.into(),
            params,
            data_dir: PathBuf::from("data"),
            snapshot_path: None,
            delete_snapshot_on_finish: true,
            recover_run_log: true,
            run_log_dir: None,
            top_k: 5,
            print_every: 100,
        }
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_path.clone().unwrap_or_else(|| self.save_path.join(SNAPSHOT_FILE))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    pub save_path: PathBuf,
    pub params_file: PathBuf,
    pub snapshot_path: PathBuf,
    pub devices: Vec<usize>,
    pub epoch: u32,
    pub step: u64,
    pub best_dev: Option<BestDev>,
    /// Model artifacts left in the save directory.
    pub models: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub model_file: PathBuf,
    pub results: EvalResults,
    pub dec_path: PathBuf,
    pub ref_path: PathBuf,
}

fn parse_id(raw: &str) -> TrainingResult<usize> {
    raw.trim()
        .parse()
        .map_err(|_| TrainingError::InvalidSpec(format!("invalid device id `{}`", raw.trim())))
}

/// Parse a comma-separated device list such as `0,1,2,3`.
pub fn parse_devices(gpus: &str) -> TrainingResult<Vec<usize>> {
    let devices = gpus
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(parse_id)
        .collect::<TrainingResult<Vec<_>>>()?;
    if devices.is_empty() {
        return Err(TrainingError::InvalidSpec("at least one device id is required".to_string()));
    }
    Ok(devices)
}

/// Test mode runs on exactly one device.
pub fn parse_device(gpus: &str) -> TrainingResult<usize> {
    if gpus.contains(',') {
        return Err(TrainingError::InvalidSpec(format!(
            "test mode takes a single device id, got `{gpus}`"
        )));
    }
    parse_id(gpus)
}

pub fn configure_training(opts: &RunOptions) -> TrainingResult<(Vec<usize>, TrainingParams)> {
    let devices = parse_devices(&opts.gpus)?;
    let params = opts.params.clone();
    params.validate()?;
    Ok((devices, params))
}

/// Checkpoint files in `save_path`, sorted by name.
pub fn model_checkpoints(save_path: &Path) -> TrainingResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(save_path)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(CHECKPOINT_EXTENSION))
        .collect();
    files.sort();
    Ok(files)
}

pub fn train_model(opts: &RunOptions, progress: &dyn ProgressSink) -> TrainingResult<TrainSummary> {
    progress.on_event(ProgressEvent::Started { run: "train".to_string() });

    let layout = DataLayout::new(opts.data_dir.clone());
    let data_paths = layout.data_paths(Mode::Train, &opts.params.encoder);
    ensure_data_paths(&data_paths)?;

    std::fs::create_dir_all(&opts.save_path)?;

    let pipe = MatchSumPipe::new(opts.params.candidate_num, opts.params.encoder.clone());
    let mut bundle = pipe.process_from_file(&data_paths)?;
    info!("{bundle}");
    progress.on_event(ProgressEvent::Message { message: bundle.to_string() });

    let (devices, params) = configure_training(opts)?;
    let params_file = opts.save_path.join(PARAMS_FILE);
    params.write_record(&params_file)?;
    info!(devices = ?devices, params = %params_file.display(), "Training configured");

    let config = ModelConfig { encoder: params.encoder.clone(), candidate_num: params.candidate_num };
    let model = match &params.checkpoint_file {
        Some(path) => {
            let artifact = CheckpointStore::new(path).load_model_artifact()?;
            info!(path = %path.display(), epoch = artifact.epoch, "Initialising model from artifact");
            MatchScorer::from_state(config, artifact.model)?
        }
        None => MatchScorer::new(config),
    };
    let optimizer = Adam::new(0.0, model.trainable_parameters());

    let run_log = opts.run_log_dir.as_ref().map(|dir| Arc::new(FileRunLog::with_root(dir.clone())));

    let snapshot_path = opts.snapshot_path();
    let checkpoint = CheckpointCallback::new(
        &snapshot_path,
        CheckpointOptions {
            delete_when_train_finish: opts.delete_snapshot_on_finish,
            recover_run_log: opts.recover_run_log,
            params_hash: Some(params.content_hash()?),
        },
        run_log.clone().map(|log| log as Arc<dyn RunLogDirs>),
    );

    if params.batch_size % devices.len() != 0 {
        return Err(TrainingError::InvalidSpec(format!(
            "batch_size {} must be divisible by the number of devices ({})",
            params.batch_size,
            devices.len()
        )));
    }

    let train = bundle.take_split("train")?;
    let val = bundle.take_split("val")?;
    let options = TrainerOptions {
        batch_size: params.batch_size,
        update_every: params.accum_count,
        n_epochs: params.n_epochs,
        print_every: opts.print_every,
        validate_every: params.valid_steps,
        metric_key: ROUGE_KEY.to_string(),
        devices: devices.clone(),
    };
    let mut trainer = Trainer::new(
        train.examples,
        val.examples,
        Box::new(model),
        Box::new(optimizer),
        MarginRankingLoss::new(params.margin),
        options,
    )?
    .with_metric(ValidMetric::new(val.records))
    .with_callback(checkpoint)
    .with_callback(WarmupCallback::new(params.max_lr, params.warmup_steps))
    .with_callback(SaveBestModels::new(&opts.save_path, opts.top_k, ROUGE_KEY));
    if let Some(log) = run_log {
        trainer = trainer.with_callback(RunLogCallback::new(log, params.clone()));
    }

    let outcome = trainer.train(progress)?;

    let models = model_checkpoints(&opts.save_path)?
        .into_iter()
        .filter(|path| *path != snapshot_path)
        .collect();
    Ok(TrainSummary {
        save_path: opts.save_path.clone(),
        params_file,
        snapshot_path,
        devices,
        epoch: outcome.epoch,
        step: outcome.step,
        best_dev: outcome.best_dev,
        models,
    })
}

pub fn test_model(opts: &RunOptions, progress: &dyn ProgressSink) -> TrainingResult<Vec<ModelReport>> {
    progress.on_event(ProgressEvent::Started { run: "test".to_string() });

    let models = model_checkpoints(&opts.save_path)?;

    let layout = DataLayout::new(opts.data_dir.clone());
    let data_paths = layout.data_paths(Mode::Test, &opts.params.encoder);
    ensure_data_paths(&data_paths)?;
    let pipe = MatchSumPipe::new(opts.params.candidate_num, opts.params.encoder.clone());
    let mut bundle = pipe.process_from_file(&data_paths)?;
    info!("{bundle}");
    let test = bundle.take_split("test")?;

    let device = parse_device(&opts.gpus)?;
    let batch_size = 1;

    if models.is_empty() {
        warn!(save_path = %opts.save_path.display(), "No model checkpoints to evaluate");
    }

    let mut reports = Vec::new();
    for model_file in models {
        let artifact = match CheckpointStore::new(&model_file).load()?.checkpoint {
            CheckpointPayload::ModelArtifact(artifact) => artifact,
            CheckpointPayload::ResumableState(_) => {
                info!(path = %model_file.display(), "Skipping training snapshot");
                continue;
            }
        };
        let model_name = model_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(model = %model_name, "Current model");
        progress.on_event(ProgressEvent::Message { message: format!("evaluating {model_name}") });

        let model = MatchScorer::from_state(artifact.config, artifact.model)?;
        let paths = ensure_result_paths(&opts.save_path, &model_name)?;
        let metric: Box<dyn Metric> = if opts.params.use_validation_metric_for_testing {
            Box::new(ValidMetric::new(test.records.clone()).with_output(paths.clone()))
        } else {
            Box::new(RougeOutputMetric::new(test.records.clone(), paths.clone(), test.examples.len()))
        };

        let mut tester = Tester::new(test.examples.clone(), Box::new(model), vec![metric], batch_size, device)?;
        let results = tester.test()?;
        reports.push(ModelReport { model_file, results, dec_path: paths.dec, ref_path: paths.reference });
    }

    progress.on_event(ProgressEvent::Finished { step: reports.len() as u64 });
    Ok(reports)
}
