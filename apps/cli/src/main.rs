//! MatchSum CLI - train and evaluate the MatchSum candidate re-ranker
//!
//! A single command drives both modes:
//! `matchsum-cli --mode train --save_path runs/cnndm --gpus 0,1 --encoder bert`
//! resumes automatically from `<save_path>/snapshot.ckpt` when a previous run
//! was interrupted, and `--mode test` evaluates every model artifact saved
//! in `--save_path`.

mod commands;
mod config;

use clap::Parser;
use tracing_subscriber::FmtSubscriber;

/// MatchSum - extractive summarization by candidate matching
#[derive(Parser, Debug)]
#[command(
    name = "matchsum",
    author,
    version,
    about = "MatchSum - train and test extractive summarization re-rankers",
    long_about = "Trains the MatchSum candidate scorer with resumable snapshots, or evaluates every saved model artifact.\nFlags override values from ~/.matchsum/config.toml and ./.matchsumrc."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    #[command(flatten)]
    run: commands::RunArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let run_config = config::load_config(args.run.config.as_deref())?;

    // Initialize tracing
    let level = config::parse_level(args.log_level.as_deref().or(run_config.log_level.as_deref()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    commands::execute(args.run, &run_config).await
}
