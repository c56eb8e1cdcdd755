//! Integration tests for the `matchsum-cli` train and test modes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn record(i: usize) -> String {
    serde_json::json!({
        "text": [
            format!("Officials announced plan number {i} on Monday."),
            "The weather was mild across the region.",
            format!("The plan {i} will cut commuting times."),
            "Local teams played a friendly match."
        ],
        "summary": [format!("Officials announced plan {i} to cut commuting times.")],
        "indices": [[0, 2], [0, 1], [1, 3]],
        "score": [0.62, 0.31, 0.05]
    })
    .to_string()
}

fn write_split(dir: &Path, split: &str, n: usize) {
    let lines: Vec<String> = (0..n).map(record).collect();
    std::fs::write(dir.join(format!("{split}_CNNDM_bert.jsonl")), lines.join("\n")).unwrap();
}

/// Helper to lay out data, save and home directories under one temp dir.
fn setup(temp_dir: &TempDir) {
    let data = temp_dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    write_split(&data, "train", 4);
    write_split(&data, "val", 2);
    write_split(&data, "test", 2);
    std::fs::create_dir_all(temp_dir.path().join("home")).unwrap();
}

fn cli(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("matchsum-cli").unwrap();
    cmd.current_dir(temp_dir.path()).env("HOME", temp_dir.path().join("home"));
    cmd
}

fn train_args(cmd: &mut Command) -> &mut Command {
    cmd.args([
        "--mode",
        "train",
        "--save_path",
        "runs/save",
        "--encoder",
        "bert",
        "--data_dir",
        "data",
        "--batch_size",
        "2",
        "--accum_count",
        "1",
        "--candidate_num",
        "3",
        "--n_epochs",
        "2",
        "--valid_steps",
        "1",
        "--warmup_steps",
        "10",
        "--log-level",
        "error",
    ])
}

#[test]
fn test_train_then_test_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    setup(&temp_dir);

    train_args(&mut cli(&temp_dir)).args(["--gpus", "0,1"]).assert().success();

    let save = temp_dir.path().join("runs/save");
    assert!(save.join("params.json").exists());
    assert!(!save.join("snapshot.ckpt").exists());
    let artifacts: Vec<_> = std::fs::read_dir(&save)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "ckpt"))
        .collect();
    assert!(!artifacts.is_empty());

    let params: serde_json::Value =
        serde_json::from_slice(&std::fs::read(save.join("params.json")).unwrap()).unwrap();
    assert_eq!(params["batch_size"], 2);
    assert_eq!(params["n_epochs"], 2);
    assert_eq!(params["encoder"], "bert");

    let output = cli(&temp_dir)
        .args([
            "--mode",
            "test",
            "--save_path",
            "runs/save",
            "--gpus",
            "0",
            "--encoder",
            "bert",
            "--data_dir",
            "data",
            "--candidate_num",
            "3",
            "--json",
            "--log-level",
            "error",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let out: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let reports = out["reports"].as_array().unwrap();
    assert_eq!(reports.len(), artifacts.len());

    let first = artifacts[0].file_name();
    let result_dir = temp_dir.path().join("runs/result").join(first);
    assert!(result_dir.join("dec").join("0.dec").exists());
    assert!(result_dir.join("ref").join("1.ref").exists());
}

#[test]
fn test_kept_snapshot_is_skipped_by_validation_metric_testing() {
    let temp_dir = TempDir::new().unwrap();
    setup(&temp_dir);

    train_args(&mut cli(&temp_dir))
        .args(["--gpus", "0", "--keep_snapshot"])
        .assert()
        .success();

    let save = temp_dir.path().join("runs/save");
    assert!(save.join("snapshot.ckpt").exists());
    let checkpoints = std::fs::read_dir(&save)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "ckpt"))
        .count();

    let output = cli(&temp_dir)
        .args([
            "--mode",
            "test",
            "--save_path",
            "runs/save",
            "--gpus",
            "0",
            "--encoder",
            "bert",
            "--data_dir",
            "data",
            "--candidate_num",
            "3",
            "--use_validation_metric_for_testing",
            "--json",
            "--log-level",
            "error",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let out: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let reports = out["reports"].as_array().unwrap();
    assert_eq!(reports.len(), checkpoints - 1);
    for report in reports {
        assert!(report["results"]["ValidMetric"]["ROUGE"].is_number());
        assert!(!report["model_file"].as_str().unwrap().ends_with("snapshot.ckpt"));
        let dec = temp_dir.path().join(report["dec_path"].as_str().unwrap());
        assert!(dec.join("0.dec").exists());
    }
}

#[test]
fn test_missing_dataset_fails() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join("home")).unwrap();

    train_args(&mut cli(&temp_dir))
        .args(["--gpus", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dataset file not found"));
}

#[test]
fn test_batch_not_divisible_by_devices_fails() {
    let temp_dir = TempDir::new().unwrap();
    setup(&temp_dir);

    train_args(&mut cli(&temp_dir))
        .args(["--gpus", "0,1,2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("divisible"));
}

#[test]
fn test_test_mode_needs_single_device() {
    let temp_dir = TempDir::new().unwrap();
    setup(&temp_dir);
    std::fs::create_dir_all(temp_dir.path().join("runs/save")).unwrap();

    cli(&temp_dir)
        .args([
            "--mode",
            "test",
            "--save_path",
            "runs/save",
            "--gpus",
            "0,1",
            "--encoder",
            "bert",
            "--data_dir",
            "data",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("single device"));
}

#[test]
fn test_mode_is_required() {
    let temp_dir = TempDir::new().unwrap();
    cli(&temp_dir)
        .args(["--save_path", "runs/save", "--gpus", "0", "--encoder", "bert"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--mode"));
}
