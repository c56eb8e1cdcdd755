//! Train and test commands.

pub mod train;

use anyhow::Result;
use clap::{ArgAction, Args, ValueEnum};
use matchsum_training::RunConfig;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Train a model, resuming from the snapshot if one exists
    Train,
    /// Evaluate every model artifact in the save path
    Test,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Training or testing mode
    #[arg(long, value_enum)]
    pub mode: ModeArg,

    /// Directory for params, snapshots and model artifacts
    #[arg(long = "save_path")]
    pub save_path: PathBuf,

    /// Device ids, comma separated (one id in test mode)
    #[arg(long)]
    pub gpus: String,

    /// Encoder the dataset was prepared for (e.g. bert, roberta)
    #[arg(long)]
    pub encoder: String,

    #[arg(long = "batch_size", default_value_t = 16)]
    pub batch_size: usize,

    /// Batches accumulated per optimizer update
    #[arg(long = "accum_count", default_value_t = 2)]
    pub accum_count: u64,

    /// Candidate summaries scored per document
    #[arg(long = "candidate_num", default_value_t = 20)]
    pub candidate_num: usize,

    #[arg(long = "max_lr", default_value_t = 2e-5)]
    pub max_lr: f64,

    /// Ranking loss margin per rank gap
    #[arg(long, default_value_t = 0.01)]
    pub margin: f64,

    #[arg(long = "warmup_steps", default_value_t = 10_000)]
    pub warmup_steps: u64,

    #[arg(long = "n_epochs", default_value_t = 5)]
    pub n_epochs: u32,

    /// Validate every N batches (0 = end of each epoch)
    #[arg(long = "valid_steps", default_value_t = 1000)]
    pub valid_steps: u64,

    /// Model artifact to initialise training from
    #[arg(long = "checkpoint_file")]
    pub checkpoint_file: Option<PathBuf>,

    /// Use the validation metric instead of writing ROUGE files only
    #[arg(
        long = "use_validation_metric_for_testing",
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    pub use_validation_metric_for_testing: bool,

    /// Directory holding {split}_CNNDM_{encoder}.jsonl
    #[arg(long = "data_dir")]
    pub data_dir: Option<PathBuf>,

    /// Snapshot file (defaults to <save_path>/snapshot.ckpt)
    #[arg(long = "snapshot_path")]
    pub snapshot_path: Option<PathBuf>,

    /// Keep the snapshot after training completes
    #[arg(long = "keep_snapshot")]
    pub keep_snapshot: bool,

    /// Root directory of the run log
    #[arg(long = "run_log_dir")]
    pub run_log_dir: Option<PathBuf>,

    /// Config file (skips ~/.matchsum/config.toml and ./.matchsumrc)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: RunArgs, config: &RunConfig) -> Result<()> {
    let opts = crate::config::run_options(&args, config);
    match args.mode {
        ModeArg::Train => train::execute(opts, args.json).await,
        ModeArg::Test => test::execute(opts, args.json).await,
    }
}
