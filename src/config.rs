use crate::error::{RagError, Result};
use crate::rag::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::rag::embeddings::{DEFAULT_EMBEDDING_MODEL, DEFAULT_HASHED_DIMENSION};
use crate::rag::refresh::DEFAULT_REFRESH_INTERVAL_SECS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOP_K: usize = 6;
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible HTTP embeddings.
    OpenAi,
    /// Local hashed bag-of-words, no network.
    Hashed,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(EmbeddingBackend::OpenAi),
            "hashed" => Ok(EmbeddingBackend::Hashed),
            other => Err(RagError::Config(format!(
                "unknown embedding backend '{}', expected 'openai' or 'hashed'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Vector size of the hashed backend.
    pub dimension: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::OpenAi,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_base: None,
            dimension: DEFAULT_HASHED_DIMENSION,
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GENERATION_MODEL.to_string(),
            api_base: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

fn default_vector_store_path() -> PathBuf {
    PathBuf::from("./vector_store")
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub documents_directory: PathBuf,
    #[serde(default = "default_vector_store_path")]
    pub vector_store_path: PathBuf,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<PathBuf>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl AppConfig {
    pub fn new(documents_directory: impl Into<PathBuf>) -> Self {
        Self {
            documents_directory: documents_directory.into(),
            vector_store_path: default_vector_store_path(),
            refresh_interval_seconds: default_refresh_interval(),
            top_k: default_top_k(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            log_directory: None,
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| RagError::Config(format!("invalid {}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RagError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than 0".into()));
        }
        if self.refresh_interval_seconds == 0 {
            return Err(RagError::Config(
                "refresh_interval_seconds must be greater than 0".into(),
            ));
        }
        if self.embedding.backend == EmbeddingBackend::Hashed && self.embedding.dimension == 0 {
            return Err(RagError::Config("embedding.dimension must be greater than 0".into()));
        }
        Ok(())
    }
}
