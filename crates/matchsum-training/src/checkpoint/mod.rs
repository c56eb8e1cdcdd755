//! Snapshot persistence, resume and best-model selection.

pub mod format;
pub mod resume;
pub mod store;
pub mod top_k;

pub use format::{
    CheckpointFile, CheckpointKind, CheckpointPayload, ModelArtifact, Snapshot, CHECKPOINT_EXTENSION, FORMAT_VERSION,
};
pub use resume::{CheckpointCallback, CheckpointOptions};
pub use store::CheckpointStore;
pub use top_k::SaveBestModels;
