//! CLI configuration loading and merging.

use crate::commands::RunArgs;
use anyhow::{Context, Result};
use matchsum_training::{RunConfig, RunOptions, TrainingParams};
use std::path::{Path, PathBuf};
use tracing::Level;

/// Load the run configuration.
///
/// Configuration precedence:
/// 1. CLI arguments (handled by clap)
/// 2. Explicit `--config` file, or else
/// 3. Local config file (./.matchsumrc)
/// 4. Global config file (~/.matchsum/config.toml)
/// 5. Defaults
pub fn load_config(explicit: Option<&Path>) -> Result<RunConfig> {
    match explicit {
        Some(path) => RunConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => Ok(RunConfig::discover_and_load()),
    }
}

pub fn parse_level(name: Option<&str>) -> Level {
    match name.unwrap_or("info") {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Combine flags and config values into run options; flags win.
pub fn run_options(args: &RunArgs, config: &RunConfig) -> RunOptions {
    let params = TrainingParams {
        encoder: args.encoder.clone(),
        candidate_num: args.candidate_num,
        batch_size: args.batch_size,
        accum_count: args.accum_count,
        max_lr: args.max_lr,
        margin: args.margin,
        warmup_steps: args.warmup_steps,
        n_epochs: args.n_epochs,
        valid_steps: args.valid_steps,
        checkpoint_file: args.checkpoint_file.clone(),
        use_validation_metric_for_testing: args.use_validation_metric_for_testing,
    };

    let mut opts = RunOptions::new(args.save_path.clone(), args.gpus.clone(), params);
    opts.data_dir = args
        .data_dir
        .clone()
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from("data"));
    opts.snapshot_path = args.snapshot_path.clone().or_else(|| config.snapshot_path.clone());
    opts.delete_snapshot_on_finish = !args.keep_snapshot && config.delete_snapshot_on_finish.unwrap_or(true);
    opts.recover_run_log = config.recover_run_log.unwrap_or(true);
    opts.run_log_dir = args.run_log_dir.clone().or_else(|| config.run_log_dir.clone());
    if let Some(top_k) = config.top_k {
        opts.top_k = top_k;
    }
    if let Some(print_every) = config.print_every {
        opts.print_every = print_every;
    }
    opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["matchsum", "--mode", "train", "--save_path", "runs/a", "--gpus", "0,1", "--encoder", "bert"];
        argv.extend_from_slice(extra);
        Wrapper::parse_from(argv).run
    }

    #[test]
    fn test_flags_override_config() {
        let config = RunConfig {
            data_dir: Some(PathBuf::from("/corpora")),
            snapshot_path: Some(PathBuf::from("/scratch/snap.ckpt")),
            top_k: Some(2),
            ..Default::default()
        };
        let opts = run_options(&parse(&["--data_dir", "local"]), &config);
        assert_eq!(opts.data_dir, PathBuf::from("local"));
        assert_eq!(opts.snapshot_path, Some(PathBuf::from("/scratch/snap.ckpt")));
        assert_eq!(opts.top_k, 2);
        assert!(opts.delete_snapshot_on_finish);
    }

    #[test]
    fn test_defaults_match_training_params() {
        let opts = run_options(&parse(&[]), &RunConfig::default());
        assert_eq!(opts.params, TrainingParams { encoder: "bert".to_string(), ..TrainingParams::default() });
        assert_eq!(opts.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_keep_snapshot_and_bool_flag() {
        let opts = run_options(&parse(&["--keep_snapshot", "--use_validation_metric_for_testing"]), &RunConfig::default());
        assert!(!opts.delete_snapshot_on_finish);
        assert!(opts.params.use_validation_metric_for_testing);

        let opts = run_options(&parse(&["--use_validation_metric_for_testing", "false"]), &RunConfig::default());
        assert!(!opts.params.use_validation_metric_for_testing);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("debug")), Level::DEBUG);
        assert_eq!(parse_level(Some("loud")), Level::INFO);
        assert_eq!(parse_level(None), Level::INFO);
    }
}
