//! MatchSum training harness
//!
//! Resumable training and checkpoint evaluation for the MatchSum candidate
//! re-ranker:
//! - Snapshot persistence and resume (`checkpoint`)
//! - Train/test orchestration (`orchestrator`)
//! - A small local engine: scorer, Adam, ranking loss, trainer (`engine`)
//! - Dataset loading and feature extraction (`dataset`)

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod params;
pub mod progress;
pub mod runlog;

pub use checkpoint::{
    CheckpointCallback, CheckpointFile, CheckpointKind, CheckpointOptions, CheckpointPayload, CheckpointStore,
    ModelArtifact, SaveBestModels, Snapshot,
};
pub use config::RunConfig;
pub use dataset::{DataBundle, Example, MatchSumPipe, SummaryRecord};
pub use error::{TrainingError, TrainingResult};
pub use layout::{DataLayout, Mode, ResultPaths};
pub use orchestrator::{
    configure_training, model_checkpoints, parse_device, parse_devices, test_model, train_model, ModelReport,
    RunOptions, TrainSummary,
};
pub use params::TrainingParams;
pub use progress::{NullProgressSink, ProgressEvent, ProgressSink, StdoutProgressSink};
pub use runlog::{FileRunLog, RunLogCallback, RunLogDirs};
