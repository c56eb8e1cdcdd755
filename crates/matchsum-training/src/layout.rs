use crate::error::TrainingResult;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Whether the orchestrator trains or evaluates saved models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}

/// Filesystem layout of the CNN/DM jsonl splits.
///
/// Default layout is `data/{split}_CNNDM_{encoder}.jsonl`.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn split_path(&self, split: &str, encoder: &str) -> PathBuf {
        self.root.join(format!("{split}_CNNDM_{encoder}.jsonl"))
    }

    /// Splits needed by a mode: `train` + `val` for training, `test` otherwise.
    #[must_use]
    pub fn data_paths(&self, mode: Mode, encoder: &str) -> BTreeMap<String, PathBuf> {
        let splits: &[&str] = match mode {
            Mode::Train => &["train", "val"],
            Mode::Test => &["test"],
        };
        splits
            .iter()
            .map(|split| ((*split).to_string(), self.split_path(split, encoder)))
            .collect()
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new(PathBuf::from("data"))
    }
}

/// Decoded and reference output directories for one evaluated model.
#[derive(Debug, Clone)]
pub struct ResultPaths {
    pub dec: PathBuf,
    pub reference: PathBuf,
}

/// Result directory sits next to the save directory: `<save_path>/../result`.
#[must_use]
pub fn result_root(save_path: &Path) -> PathBuf {
    save_path.join("..").join("result")
}

/// Create `<save_path>/../result/<model_name>/{dec,ref}`.
pub fn ensure_result_paths(save_path: &Path, model_name: &str) -> TrainingResult<ResultPaths> {
    let model_dir = result_root(save_path).join(model_name);
    let paths = ResultPaths { dec: model_dir.join("dec"), reference: model_dir.join("ref") };
    std::fs::create_dir_all(&paths.dec)?;
    std::fs::create_dir_all(&paths.reference)?;
    Ok(paths)
}
