use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training options: {0}")]
    InvalidSpec(String),

    #[error("dataset file not found: {}", .0.display())]
    MissingDataset(PathBuf),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("failed to deserialize checkpoint {}: {source}", path.display())]
    Deserialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("incompatible checkpoint {}: {reason}", path.display())]
    IncompatibleCheckpoint { path: PathBuf, reason: String },

    #[error("model error: {0}")]
    Model(String),

    #[error("optimizer error: {0}")]
    Optimizer(String),

    #[error("metric error: {0}")]
    Metric(String),

    #[error("run log error: {0}")]
    RunLog(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
