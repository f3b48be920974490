use crate::error::{RagError, Result};
use async_openai::config::OpenAIConfig;
use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use tracing::debug;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_HASHED_DIMENSION: usize = 384;
const DEFAULT_BATCH_SIZE: usize = 64;

/// Turns text into fixed-dimension vectors.
///
/// Index builds and queries must go through the same embedder; the index
/// records [`Embedder::model_id`] and refuses to load under another one.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("No embedding returned".to_string()))
    }
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
pub struct EmbeddingService {
    client: Client<OpenAIConfig>,
    model: String,
    batch_size: usize,
}

impl EmbeddingService {
    /// With no `api_base` the public OpenAI endpoint is used and the key is
    /// read from `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>, api_base: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(base) = api_base {
            config = config.with_api_base(base);
            // local servers accept any key
            if std::env::var("OPENAI_API_KEY").is_err() {
                config = config.with_api_key("unused");
            }
        }

        Self {
            client: Client::with_config(config),
            model: model.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn create_embeddings(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.as_str())
            .input(texts)
            .build()
            .map_err(|e| RagError::Embedding(format!("Failed to build embedding request: {}", e)))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| RagError::Embedding(format!("Failed to create embeddings: {}", e)))?;

        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        if data.len() != expected {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                expected,
                data.len()
            )));
        }

        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = i, size = batch.len(), model = %self.model, "Requesting embeddings");
            embeddings.extend(self.create_embeddings(batch.to_vec()).await?);
        }
        Ok(embeddings)
    }
}

/// Local bag-of-words embedder using signed feature hashing.
///
/// Deterministic across runs and platforms and needs no network, so it backs
/// offline use and tests. Texts sharing terms land close together.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimension: usize,
    model_id: String,
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHED_DIMENSION)
    }
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashed-bow-{}", dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            vector[slot] += sign;
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Lowercase word tokens; dots inside numbers ("4.00x", "7.2") are kept.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.').to_lowercase())
        .filter(|t| !t.is_empty())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}
