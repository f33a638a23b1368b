//! Error kinds raised by the prediction pipeline.

use thiserror::Error;

/// Errors returned by the feature, dataset, training, registry and inference stages.
///
/// None of these are retried automatically: retrying with identical inputs
/// reproduces the identical error.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Not enough examples, or a label class missing from a partition.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Empty, single-class or wrongly shaped training input.
    #[error("training error: {0}")]
    Training(String),

    /// Feature vector shape disagrees with the trained schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Inference or schema query before any artifact was published.
    #[error("no model available")]
    NoModelAvailable,

    /// Stored artifact does not match its published digest.
    #[error("corrupt artifact {version}: {reason}")]
    CorruptArtifact { version: String, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
