//! Owns the live index and coordinates loading, rebuilding and querying.

use super::chunker::TextChunker;
use super::documents::{DocumentLoader, FileSystemLoader};
use super::embeddings::{Embedder, EmbeddingService, HashedEmbedder};
use super::generator::{AnswerGenerator, OpenAiAnswerGenerator};
use super::refresh::{IndexState, RefreshScheduler};
use super::search::{build_context, QueryResult, Retriever};
use super::vector_store::VectorIndex;
use super::{Chunk, SearchResult};
use crate::config::{AppConfig, EmbeddingBackend};
use crate::error::{RagError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Snapshot of the index for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub state: IndexState,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_interval_seconds: u64,
    pub chunk_count: usize,
    pub build_id: Option<Uuid>,
    pub embedding_model: String,
    pub rebuild_count: u64,
}

pub struct IndexService {
    config: AppConfig,
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn AnswerGenerator>,
    chunker: TextChunker,
    retriever: Retriever,
    index: RwLock<Option<Arc<VectorIndex>>>,
    // Held for the whole of a rebuild so concurrent callers wait for it
    // instead of starting their own.
    scheduler: Mutex<RefreshScheduler>,
    rebuilds: AtomicU64,
}

impl IndexService {
    pub fn new(
        config: AppConfig,
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        let chunker = TextChunker::new(config.chunk_size, config.chunk_overlap);
        let retriever = Retriever::new(config.top_k);
        let scheduler = RefreshScheduler::new(config.refresh_interval_seconds);

        Self {
            config,
            loader,
            embedder,
            generator,
            chunker,
            retriever,
            index: RwLock::new(None),
            scheduler: Mutex::new(scheduler),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Wires up the filesystem loader and the configured embedding and
    /// generation backends.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let embedder: Arc<dyn Embedder> = match config.embedding.backend {
            EmbeddingBackend::OpenAi => Arc::new(
                EmbeddingService::new(
                    config.embedding.model.clone(),
                    config.embedding.api_base.as_deref(),
                )
                .with_batch_size(config.embedding.batch_size),
            ),
            EmbeddingBackend::Hashed => Arc::new(HashedEmbedder::new(config.embedding.dimension)),
        };
        let generator = Arc::new(OpenAiAnswerGenerator::new(config.generation.clone()));

        Ok(Self::new(
            config,
            Arc::new(FileSystemLoader::new()),
            embedder,
            generator,
        ))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Loads the persisted index when one exists and matches the embedder,
    /// otherwise builds a new one from the documents directory.
    pub async fn initialize(&self) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;

        let path = &self.config.vector_store_path;
        let recover_path = path.clone();
        match tokio::task::spawn_blocking(move || VectorIndex::recover(&recover_path)).await {
            Ok(Ok(true)) => info!(path = %path.display(), "Restored index after interrupted swap"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(error = %e, "Index recovery failed"),
            Err(e) => warn!(error = %e, "Index recovery task failed"),
        }

        if VectorIndex::is_present(path) {
            match self.load_persisted().await {
                Ok(index) => {
                    scheduler.mark_refreshed(index.built_at());
                    info!(
                        build_id = %index.build_id(),
                        built_at = %index.built_at(),
                        chunks = index.len(),
                        "Using persisted index"
                    );
                    *self.index.write().await = Some(Arc::new(index));
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "Persisted index unusable, rebuilding"),
            }
        } else {
            info!(path = %path.display(), "No persisted index found, building");
        }

        self.rebuild_locked(&mut scheduler).await.map(|_| ())
    }

    /// Rebuilds now regardless of staleness.
    pub async fn refresh(&self) -> Result<()> {
        info!("Manual refresh triggered");
        let mut scheduler = self.scheduler.lock().await;
        self.rebuild_locked(&mut scheduler).await.map(|_| ())
    }

    /// Returns the current index, rebuilding first when it is missing or
    /// stale. An empty corpus keeps whatever index was there before.
    pub async fn ensure_fresh(&self) -> Result<Option<Arc<VectorIndex>>> {
        let mut scheduler = self.scheduler.lock().await;
        let state = scheduler.state_at(Utc::now());
        if state != IndexState::Fresh {
            debug!(?state, "Index needs rebuild");
            match self.rebuild_locked(&mut scheduler).await {
                Ok(index) => return Ok(Some(index)),
                Err(e) if e.is_empty_corpus() => {
                    warn!(error = %e, "Nothing to index, keeping previous index");
                }
                Err(e) => return Err(e),
            }
        }
        drop(scheduler);
        Ok(self.current().await)
    }

    pub async fn current(&self) -> Option<Arc<VectorIndex>> {
        self.index.read().await.clone()
    }

    /// Raw similarity search, no answer generation.
    pub async fn search(&self, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        match self.ensure_fresh().await? {
            Some(index) => index.search(self.embedder.as_ref(), text, k).await,
            None => Ok(Vec::new()),
        }
    }

    /// Answers `question` from the indexed documents. Never fails; problems
    /// are reported in the answer text with no sources.
    pub async fn query(&self, question: &str) -> QueryResult {
        info!(question, "Processing query");

        let index = match self.ensure_fresh().await {
            Ok(Some(index)) => index,
            Ok(None) => return QueryResult::not_found(),
            Err(e) => {
                error!(error = %e, "Index unavailable for query");
                return QueryResult::error(e);
            }
        };

        let results = match self
            .retriever
            .retrieve(&index, self.embedder.as_ref(), question)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Retrieval failed");
                return QueryResult::error(e);
            }
        };
        if results.is_empty() {
            return QueryResult::not_found();
        }

        let context = build_context(&results);
        match self.generator.generate(question, &context).await {
            Ok(answer) => QueryResult::answered(answer, &results),
            Err(e) => {
                error!(error = %e, "Answer generation failed");
                QueryResult::error(e)
            }
        }
    }

    pub async fn status(&self) -> IndexStatus {
        let (state, last_refresh, interval) = {
            let scheduler = self.scheduler.lock().await;
            (
                scheduler.state(),
                scheduler.last_refresh(),
                scheduler.refresh_state().refresh_interval_seconds,
            )
        };
        let index = self.current().await;

        IndexStatus {
            state: if index.is_some() { state } else { IndexState::NoIndex },
            last_refresh,
            refresh_interval_seconds: interval,
            chunk_count: index.as_ref().map(|i| i.len()).unwrap_or(0),
            build_id: index.as_ref().map(|i| i.build_id()),
            embedding_model: self.embedder.model_id().to_string(),
            rebuild_count: self.rebuild_count(),
        }
    }

    /// Number of successful rebuilds since this service was created.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    async fn load_persisted(&self) -> Result<VectorIndex> {
        let path = self.config.vector_store_path.clone();
        let task_path = path.clone();
        let index = tokio::task::spawn_blocking(move || VectorIndex::load(&task_path))
            .await
            .map_err(|e| RagError::index_load(&path, e))??;

        let manifest = index.manifest();
        if manifest.embedding_model != self.embedder.model_id() {
            return Err(RagError::index_load(
                &path,
                format!(
                    "index was built with embedding model '{}', configured model is '{}'",
                    manifest.embedding_model,
                    self.embedder.model_id()
                ),
            ));
        }
        Ok(index)
    }

    /// Full rebuild. The caller holds the scheduler lock; the live index and
    /// refresh time only change once the new index is persisted.
    async fn rebuild_locked(
        &self,
        scheduler: &mut RefreshScheduler,
    ) -> Result<Arc<VectorIndex>> {
        let dir = &self.config.documents_directory;
        let report = self.loader.load_directory(dir).await;
        for failure in &report.failures {
            warn!(path = %failure.path.display(), reason = %failure.reason, "Document skipped");
        }
        if report.documents.is_empty() {
            warn!(dir = %dir.display(), "No documents found");
            return Err(RagError::EmptyCorpus(dir.clone()));
        }

        let chunks: Vec<Chunk> = report
            .documents
            .iter()
            .flat_map(|document| self.chunker.split(document))
            .collect();
        if chunks.is_empty() {
            return Err(RagError::EmptyCorpus(dir.clone()));
        }
        info!(
            documents = report.documents.len(),
            chunks = chunks.len(),
            "Split documents into chunks"
        );

        let index = Arc::new(VectorIndex::build(chunks, self.embedder.as_ref()).await?);

        let to_persist = Arc::clone(&index);
        let path = self.config.vector_store_path.clone();
        tokio::task::spawn_blocking(move || to_persist.persist(&path))
            .await
            .map_err(|e| RagError::Persist(format!("persist task failed: {}", e)))??;

        *self.index.write().await = Some(Arc::clone(&index));
        scheduler.mark_refreshed(index.built_at());
        let rebuilds = self.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
        info!(build_id = %index.build_id(), rebuilds, "Index rebuilt");

        Ok(index)
    }
}
