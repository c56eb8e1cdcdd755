//! Training command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use matchsum_training::{train_model, NullProgressSink, ProgressSink, RunOptions, StdoutProgressSink};

pub async fn execute(opts: RunOptions, json_output: bool) -> Result<()> {
    let save_path = opts.save_path.clone();
    let summary = tokio::task::spawn_blocking(move || {
        let progress: Box<dyn ProgressSink> =
            if json_output { Box::new(NullProgressSink) } else { Box::new(StdoutProgressSink) };
        train_model(&opts, progress.as_ref())
    })
    .await
    .context("Training task panicked")?
    .with_context(|| format!("Training failed for {}", save_path.display()))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Save path: {}", summary.save_path.display().to_string().cyan());
    println!("  Params: {}", summary.params_file.display().to_string().dimmed());
    println!("  Devices: {:?}", summary.devices);
    println!("  Epochs: {}  Steps: {}", summary.epoch, summary.step);
    match &summary.best_dev {
        Some(best) => println!(
            "  Best dev: {} (epoch {}, step {})",
            format!("{:.6}", best.indicator).cyan(),
            best.epoch,
            best.step
        ),
        None => println!("  {}", "No validation result recorded.".dimmed()),
    }
    if summary.snapshot_path.exists() {
        println!("  Snapshot kept: {}", summary.snapshot_path.display().to_string().dimmed());
    }
    println!();
    println!("{}", format!("Model artifacts ({})", summary.models.len()).bold().cyan());
    for model in &summary.models {
        println!("  {}", model.display().to_string().dimmed());
    }
    println!();
    Ok(())
}
