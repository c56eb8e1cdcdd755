//! Run configuration file support.
//!
//! Settings that rarely change between runs live in TOML so they don't have
//! to be repeated on every command line. Command-line flags still win.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory holding `{split}_CNNDM_{encoder}.jsonl`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,

    /// Snapshot location; defaults to `<save_path>/snapshot.ckpt`.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    #[serde(default)]
    pub delete_snapshot_on_finish: Option<bool>,

    #[serde(default)]
    pub recover_run_log: Option<bool>,

    /// Root of the run log; no run log is kept when unset.
    #[serde(default)]
    pub run_log_dir: Option<PathBuf>,

    /// Number of best model artifacts kept.
    #[serde(default)]
    pub top_k: Option<usize>,

    #[serde(default)]
    pub print_every: Option<u64>,
}

impl RunConfig {
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        if !path.exists() {
            return Err(TrainingError::Config(format!("{} not found", path.display())));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| TrainingError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| TrainingError::Config(format!("{}: {}", path.display(), e)))
    }

    /// `~/.matchsum/config.toml`
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".matchsum")
            .join("config.toml")
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".matchsumrc")
    }

    /// Global config, then local config on top of it. Unreadable files are skipped.
    pub fn discover_and_load() -> Self {
        let mut config = Self::default();
        if let Ok(global) = Self::load_from_file(&Self::default_global_path()) {
            config.merge(&global);
        }
        if let Ok(local) = Self::load_from_file(&Self::default_local_path()) {
            config.merge(&local);
        }
        config
    }

    /// Values set in `other` override values in `self`.
    pub fn merge(&mut self, other: &Self) {
        if let Some(ref data_dir) = other.data_dir {
            self.data_dir = Some(data_dir.clone());
        }
        if let Some(ref log_level) = other.log_level {
            self.log_level = Some(log_level.clone());
        }
        if let Some(ref snapshot_path) = other.snapshot_path {
            self.snapshot_path = Some(snapshot_path.clone());
        }
        if other.delete_snapshot_on_finish.is_some() {
            self.delete_snapshot_on_finish = other.delete_snapshot_on_finish;
        }
        if other.recover_run_log.is_some() {
            self.recover_run_log = other.recover_run_log;
        }
        if let Some(ref run_log_dir) = other.run_log_dir {
            self.run_log_dir = Some(run_log_dir.clone());
        }
        if other.top_k.is_some() {
            self.top_k = other.top_k;
        }
        if other.print_every.is_some() {
            self.print_every = other.print_every;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config_content = r#"
data_dir = "/corpora/cnndm"
log_level = "debug"
snapshot_path = "/scratch/snapshot.ckpt"
delete_snapshot_on_finish = false
run_log_dir = "logs"
top_k = 3
"#;
        std::fs::write(&config_path, config_content).unwrap();

        let config = RunConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/corpora/cnndm")));
        assert_eq!(config.log_level, Some("debug".to_string()));
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/scratch/snapshot.ckpt")));
        assert_eq!(config.delete_snapshot_on_finish, Some(false));
        assert_eq!(config.recover_run_log, None);
        assert_eq!(config.run_log_dir, Some(PathBuf::from("logs")));
        assert_eq!(config.top_k, Some(3));
    }

    #[test]
    fn test_missing_or_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent.toml");
        assert!(matches!(RunConfig::load_from_file(&missing), Err(TrainingError::Config(_))));

        let invalid = temp_dir.path().join("bad.toml");
        std::fs::write(&invalid, "top_k = \"many\"").unwrap();
        assert!(matches!(RunConfig::load_from_file(&invalid), Err(TrainingError::Config(_))));
    }

    #[test]
    fn test_merge() {
        let mut base = RunConfig { top_k: Some(5), log_level: Some("info".to_string()), ..Default::default() };
        let local = RunConfig { top_k: Some(2), recover_run_log: Some(false), ..Default::default() };
        base.merge(&local);
        assert_eq!(base.top_k, Some(2));
        assert_eq!(base.recover_run_log, Some(false));
        assert_eq!(base.log_level, Some("info".to_string()));
    }

    #[test]
    fn test_serialized_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let config = RunConfig { print_every: Some(50), ..Default::default() };
        std::fs::write(&config_path, toml::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(RunConfig::load_from_file(&config_path).unwrap(), config);
    }
}
