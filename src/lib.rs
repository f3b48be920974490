//! Retrieval pipeline for question answering over credit documents.
//!
//! Documents are loaded from a directory, split into overlapping chunks,
//! tagged with document type and section, embedded, and kept in a persisted
//! vector index that is rebuilt once it goes stale.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod rag;

pub use config::AppConfig;
pub use error::{RagError, Result};
pub use rag::search::{QueryResult, SourceCitation};
pub use rag::service::{IndexService, IndexStatus};
