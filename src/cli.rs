//! Command-line surface of the `credit-rag` binary.

use crate::config::{AppConfig, EmbeddingBackend};
use crate::error::{RagError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "credit-rag",
    version,
    about = "Question answering over credit agreements, compliance certificates and credit applications"
)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, short = 'c', env = "CREDIT_RAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the credit documents
    #[arg(long, env = "CREDIT_RAG_DOCUMENTS_DIR")]
    pub documents_dir: Option<PathBuf>,

    /// Where the vector index is persisted
    #[arg(long)]
    pub vector_store: Option<PathBuf>,

    /// Seconds before the index is considered stale
    #[arg(long)]
    pub refresh_interval: Option<u64>,

    /// Chunks retrieved per question
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Embedding backend: openai or hashed
    #[arg(long)]
    pub embedding_backend: Option<EmbeddingBackend>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ask a question and print the answer with its sources
    Query {
        question: String,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the index from the documents directory now
    Refresh,
    /// Show index state
    Status,
    /// Print the most similar chunks without generating an answer
    Search {
        text: String,
        #[arg(short = 'k', long, default_value_t = 6)]
        k: usize,
    },
}

impl Command {
    /// `refresh` rebuilds unconditionally, so loading the old index first is
    /// wasted work.
    pub fn needs_initialize(&self) -> bool {
        !matches!(self, Command::Refresh)
    }

    /// A query always produces an answer, degraded if the index stays
    /// unavailable. Other commands only tolerate an empty corpus.
    pub fn continues_after_init_failure(&self, error: &RagError) -> bool {
        error.is_empty_corpus() || matches!(self, Command::Query { .. })
    }
}

impl Cli {
    /// Reads the config file (if any) and applies flag overrides on top.
    pub fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = match (&self.config, &self.documents_dir) {
            (Some(path), _) => AppConfig::load_from_file(path)?,
            (None, Some(dir)) => AppConfig::new(dir.clone()),
            (None, None) => {
                return Err(RagError::Config(
                    "either --config or --documents-dir is required".to_string(),
                ))
            }
        };

        if let Some(dir) = &self.documents_dir {
            config.documents_directory = dir.clone();
        }
        if let Some(path) = &self.vector_store {
            config.vector_store_path = path.clone();
        }
        if let Some(secs) = self.refresh_interval {
            config.refresh_interval_seconds = secs;
        }
        if let Some(k) = self.top_k {
            config.top_k = k;
        }
        if let Some(backend) = self.embedding_backend {
            config.embedding.backend = backend;
        }

        config.validate()?;
        Ok(config)
    }
}
