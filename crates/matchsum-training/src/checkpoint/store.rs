use crate::checkpoint::format::{
    CheckpointFile, CheckpointHeader, CheckpointKind, CheckpointPayload, ModelArtifact, Snapshot, FORMAT_VERSION,
};
use crate::error::{TrainingError, TrainingResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A single checkpoint file on disk.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write the whole envelope, replacing any previous file.
    ///
    /// Data goes to a temp file in the target directory first and is renamed
    /// over the target once synced, so readers never observe a partial file.
    pub fn save(&self, file: &CheckpointFile) -> TrainingResult<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let bytes = serde_json::to_vec(file)?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), kind = %file.checkpoint.kind(), bytes = bytes.len(), "Checkpoint written");
        Ok(())
    }

    pub fn save_snapshot(&self, snapshot: Snapshot) -> TrainingResult<()> {
        self.save(&CheckpointFile::new(CheckpointPayload::ResumableState(snapshot)))
    }

    pub fn save_model_artifact(&self, artifact: ModelArtifact) -> TrainingResult<()> {
        self.save(&CheckpointFile::new(CheckpointPayload::ModelArtifact(artifact)))
    }

    pub fn load(&self) -> TrainingResult<CheckpointFile> {
        let bytes = std::fs::read(&self.path)?;
        let header: CheckpointHeader = serde_json::from_slice(&bytes)
            .map_err(|source| TrainingError::Deserialization { path: self.path.clone(), source })?;
        if header.format_version != FORMAT_VERSION {
            return Err(TrainingError::IncompatibleCheckpoint {
                path: self.path.clone(),
                reason: format!(
                    "format version {} is not supported (expected {FORMAT_VERSION})",
                    header.format_version
                ),
            });
        }
        serde_json::from_slice(&bytes).map_err(|source| TrainingError::Deserialization { path: self.path.clone(), source })
    }

    pub fn load_snapshot(&self) -> TrainingResult<Snapshot> {
        match self.load()?.checkpoint {
            CheckpointPayload::ResumableState(snapshot) => Ok(snapshot),
            other => Err(self.wrong_kind(CheckpointKind::ResumableState, other.kind())),
        }
    }

    pub fn load_model_artifact(&self) -> TrainingResult<ModelArtifact> {
        match self.load()?.checkpoint {
            CheckpointPayload::ModelArtifact(artifact) => Ok(artifact),
            other => Err(self.wrong_kind(CheckpointKind::ModelArtifact, other.kind())),
        }
    }

    /// Remove the file. Returns `false` when there was nothing to remove.
    pub fn delete(&self) -> TrainingResult<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn wrong_kind(&self, expected: CheckpointKind, found: CheckpointKind) -> TrainingError {
        TrainingError::IncompatibleCheckpoint {
            path: self.path.clone(),
            reason: format!("expected a {expected} checkpoint, found {found}"),
        }
    }
}
