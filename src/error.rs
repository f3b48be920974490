//! Error types for the indexing and retrieval pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, indexing or querying credit documents.
#[derive(Error, Debug)]
pub enum RagError {
    /// A single document could not be parsed. Skipped by batch loading.
    #[error("failed to load {path}: {reason}")]
    LoaderFile { path: PathBuf, reason: String },

    /// A build found nothing to index. The prior index, if any, is kept.
    #[error("no documents found in {0}")]
    EmptyCorpus(PathBuf),

    /// The persisted index is missing, unreadable, or built with another model.
    #[error("index unavailable at {path}: {reason}")]
    IndexLoad { path: PathBuf, reason: String },

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("answer generation error: {0}")]
    Generation(String),

    /// Writing the index to durable storage failed.
    #[error("failed to persist index: {0}")]
    Persist(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub fn is_empty_corpus(&self) -> bool {
        matches!(self, RagError::EmptyCorpus(_))
    }

    pub(crate) fn index_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        RagError::IndexLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<sled::Error> for RagError {
    fn from(e: sled::Error) -> Self {
        RagError::Persist(format!("document store: {}", e))
    }
}

impl From<bincode::Error> for RagError {
    fn from(e: bincode::Error) -> Self {
        RagError::Persist(format!("serialization: {}", e))
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::Persist(format!("manifest: {}", e))
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;
