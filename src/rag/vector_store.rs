//! In-memory vector index with an atomically swapped on-disk form.
//!
//! Layout of a persisted index directory:
//!
//! ```text
//! vector_store/
//!   vectors.bin   bincode Vec<Vec<f32>>, row i belongs to chunk i
//!   docstore/     sled tree: big-endian u64 position -> bincode Chunk
//!   index.json    manifest; written last, its presence marks a valid index
//! ```

use super::embeddings::Embedder;
use super::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "index.json";
const VECTORS_FILE: &str = "vectors.bin";
const DOCSTORE_DIR: &str = "docstore";
const FORMAT_VERSION: u32 = 1;
const STAGING_TAG: &str = "staging-";
const RETIRED_TAG: &str = "retired-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub build_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_count: usize,
}

pub struct VectorIndex {
    manifest: IndexManifest,
    chunks: Vec<Chunk>,
    /// Normalized embeddings, one row per chunk.
    vectors: DMatrix<f32>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Embeds every chunk and builds a searchable index in memory.
    pub async fn build(chunks: Vec<Chunk>, embedder: &dyn Embedder) -> Result<Self> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder.embed_documents(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            build_id: Uuid::new_v4(),
            built_at: Utc::now(),
            embedding_model: embedder.model_id().to_string(),
            dimension: embeddings.first().map(|e| e.len()).unwrap_or(0),
            chunk_count: chunks.len(),
        };

        let vectors = to_matrix(
            &normalized_rows(&embeddings, manifest.dimension)?,
            manifest.dimension,
        )?;
        info!(
            chunks = chunks.len(),
            dimension = manifest.dimension,
            model = %manifest.embedding_model,
            "Built vector index"
        );

        Ok(Self {
            manifest,
            chunks,
            vectors,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn build_id(&self) -> Uuid {
        self.manifest.build_id
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.manifest.built_at
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Top `k` chunks by cosine similarity, best first. Ties keep index order.
    pub async fn search(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = embedder.embed_query(query).await?;
        Ok(self.search_by_vector(&query_embedding, k))
    }

    pub fn search_by_vector(&self, query_embedding: &[f32], k: usize) -> Vec<SearchResult> {
        if self.is_empty() {
            return Vec::new();
        }
        if query_embedding.len() != self.manifest.dimension {
            warn!(
                expected = self.manifest.dimension,
                actual = query_embedding.len(),
                "Query embedding dimension mismatch"
            );
            return Vec::new();
        }

        let query = normalize(DVector::from_column_slice(query_embedding));
        let scores = &self.vectors * query;

        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(i, score)| SearchResult {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }

    /// True when `path` holds a manifest, i.e. a completed index.
    pub fn is_present(path: &Path) -> bool {
        path.join(MANIFEST_FILE).is_file()
    }

    /// Writes the index to `path`, replacing any previous index only after
    /// the new one is completely on disk.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let (parent, name) = split_store_path(path);
        fs::create_dir_all(&parent)?;

        // an interrupted swap must not lose the previous index
        Self::recover(path)?;
        remove_orphans(path);

        let staging = parent.join(format!(".{}.{}{}", name, STAGING_TAG, self.manifest.build_id));
        let retired = parent.join(format!(".{}.{}{}", name, RETIRED_TAG, self.manifest.build_id));

        if let Err(e) = self.write_to(&staging) {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                debug!(path = %staging.display(), error = %cleanup, "Failed to remove staging index");
            }
            return Err(e);
        }

        if path.exists() {
            fs::rename(path, &retired)?;
            if let Err(e) = fs::rename(&staging, path) {
                // put the previous index back
                fs::rename(&retired, path)?;
                return Err(e.into());
            }
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!(path = %retired.display(), error = %e, "Failed to remove retired index");
            }
        } else {
            fs::rename(&staging, path)?;
        }

        info!(path = %path.display(), build_id = %self.manifest.build_id, "Persisted vector index");
        Ok(())
    }

    /// Restores the newest retired index when a swap was interrupted between
    /// its two renames, leaving no manifest at `path`. Returns whether an
    /// index was restored.
    pub fn recover(path: &Path) -> Result<bool> {
        if Self::is_present(path) {
            return Ok(false);
        }

        let newest = orphan_dirs(path, RETIRED_TAG)
            .into_iter()
            .filter_map(|dir| read_manifest(&dir).ok().map(|m| (m.built_at, dir)))
            .max_by_key(|(built_at, _)| *built_at);
        let Some((_, retired)) = newest else {
            return Ok(false);
        };

        if path.exists() {
            // a directory without a manifest is not an index
            fs::remove_dir_all(path)?;
        }
        fs::rename(&retired, path)?;
        warn!(
            from = %retired.display(),
            to = %path.display(),
            "Recovered index from an interrupted swap"
        );
        Ok(true)
    }

    fn write_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let rows: Vec<Vec<f32>> = self
            .vectors
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();
        fs::write(dir.join(VECTORS_FILE), bincode::serialize(&rows)?)?;

        let db = sled::open(dir.join(DOCSTORE_DIR))?;
        for (i, chunk) in self.chunks.iter().enumerate() {
            db.insert((i as u64).to_be_bytes(), bincode::serialize(chunk)?)?;
        }
        db.flush()?;
        drop(db);

        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&self.manifest)?,
        )?;
        Ok(())
    }

    /// Reads a persisted index. Any missing or unreadable part is reported as
    /// [`RagError::IndexLoad`].
    pub fn load(path: &Path) -> Result<Self> {
        if !Self::is_present(path) {
            return Err(RagError::index_load(path, "no index manifest found"));
        }

        let manifest = read_manifest(path)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::index_load(
                path,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }

        let rows: Vec<Vec<f32>> = fs::read(path.join(VECTORS_FILE))
            .map_err(|e| RagError::index_load(path, e))
            .and_then(|bytes| {
                bincode::deserialize(&bytes).map_err(|e| RagError::index_load(path, e))
            })?;

        let db = sled::open(path.join(DOCSTORE_DIR)).map_err(|e| RagError::index_load(path, e))?;
        let mut chunks = Vec::with_capacity(manifest.chunk_count);
        for item in db.iter() {
            let (_, value) = item.map_err(|e| RagError::index_load(path, e))?;
            let chunk: Chunk =
                bincode::deserialize(&value).map_err(|e| RagError::index_load(path, e))?;
            chunks.push(chunk);
        }
        drop(db);

        if rows.len() != manifest.chunk_count || chunks.len() != manifest.chunk_count {
            return Err(RagError::index_load(
                path,
                format!(
                    "manifest lists {} chunks, found {} vectors and {} documents",
                    manifest.chunk_count,
                    rows.len(),
                    chunks.len()
                ),
            ));
        }

        // rows were normalized before they were written
        let vectors =
            to_matrix(&rows, manifest.dimension).map_err(|e| RagError::index_load(path, e))?;

        info!(path = %path.display(), chunks = chunks.len(), "Loaded vector index");
        Ok(Self {
            manifest,
            chunks,
            vectors,
        })
    }
}

fn read_manifest(path: &Path) -> Result<IndexManifest> {
    let bytes = fs::read(path.join(MANIFEST_FILE)).map_err(|e| RagError::index_load(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| RagError::index_load(path, e))
}

/// Parent directory and file name of an index path.
fn split_store_path(path: &Path) -> (PathBuf, String) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("vector_store")
        .to_string();
    (parent, name)
}

/// Sibling directories named `.<name>.<tag><build id>`.
fn orphan_dirs(path: &Path, tag: &str) -> Vec<PathBuf> {
    let (parent, name) = split_store_path(path);
    let prefix = format!(".{}.{}", name, tag);
    let entries = match fs::read_dir(&parent) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect()
}

/// Deletes staging and retired directories left by interrupted persists.
fn remove_orphans(path: &Path) {
    for dir in orphan_dirs(path, STAGING_TAG)
        .into_iter()
        .chain(orphan_dirs(path, RETIRED_TAG))
    {
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!(path = %dir.display(), "Removed leftover index directory"),
            Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove leftover index directory"),
        }
    }
}

fn normalize(v: DVector<f32>) -> DVector<f32> {
    let norm = v.norm();
    if norm > 0.0 {
        v / norm
    } else {
        v
    }
}

/// Unit-length copies of `embeddings`, all checked against `dimension`.
fn normalized_rows(embeddings: &[Vec<f32>], dimension: usize) -> Result<Vec<Vec<f32>>> {
    embeddings
        .iter()
        .enumerate()
        .map(|(i, embedding)| {
            if embedding.len() != dimension {
                return Err(RagError::Embedding(format!(
                    "Embedding {} has dimension {}, expected {}",
                    i,
                    embedding.len(),
                    dimension
                )));
            }
            Ok(normalize(DVector::from_column_slice(embedding))
                .iter()
                .copied()
                .collect())
        })
        .collect()
}

/// Stacks rows into an `n x dimension` matrix.
fn to_matrix(rows: &[Vec<f32>], dimension: usize) -> Result<DMatrix<f32>> {
    if let Some(bad) = rows.iter().position(|r| r.len() != dimension) {
        return Err(RagError::Embedding(format!(
            "Row {} has dimension {}, expected {}",
            bad,
            rows[bad].len(),
            dimension
        )));
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(DMatrix::from_row_slice(rows.len(), dimension, &flat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embeddings::HashedEmbedder;
    use crate::rag::{ChunkMetadata, DocumentType};
    use tempfile::tempdir;

    fn chunk(i: usize, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source_filename: "agreement.pdf".to_string(),
                source_path: "/docs/agreement.pdf".to_string(),
                file_type: "pdf".to_string(),
                document_type: DocumentType::CreditAgreement,
                chunk_index: i,
                total_chunks: 4,
                section: None,
                page_number: Some(i as u32 + 1),
                byte_range: 0..content.len(),
            },
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            chunk(0, "The Total Leverage Ratio shall not exceed 4.00x as of the last day of any quarter"),
            chunk(1, "Applicable Margin means 2.25% per annum for SOFR Loans"),
            chunk(2, "Events of Default include failure to pay principal when due"),
            chunk(3, "The Borrower shall deliver a Compliance Certificate within 45 days"),
        ]
    }

    #[test]
    fn test_normalize() {
        let v = normalize(DVector::from_vec(vec![3.0, 4.0]));
        assert!((v.norm() - 1.0).abs() < 1e-6);
        let zero = normalize(DVector::from_vec(vec![0.0, 0.0]));
        assert_eq!(zero.norm(), 0.0);
    }

    #[tokio::test]
    async fn test_identical_query_is_top_result() {
        let embedder = HashedEmbedder::default();
        let index = VectorIndex::build(sample_chunks(), &embedder).await.unwrap();

        for chunk in sample_chunks() {
            let results = index.search(&embedder, &chunk.content, 6).await.unwrap();
            assert_eq!(results[0].chunk.content, chunk.content);
            assert!((results[0].score - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_search_ordering_and_limit() {
        let embedder = HashedEmbedder::default();
        let index = VectorIndex::build(sample_chunks(), &embedder).await.unwrap();

        let results = index.search(&embedder, "leverage ratio", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].chunk.metadata.chunk_index, 0);

        let all = index.search(&embedder, "leverage ratio", 10).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_persist_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vector_store");
        let embedder = HashedEmbedder::default();
        let index = VectorIndex::build(sample_chunks(), &embedder).await.unwrap();

        assert!(!VectorIndex::is_present(&path));
        index.persist(&path).unwrap();
        assert!(VectorIndex::is_present(&path));

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.manifest(), index.manifest());
        assert_eq!(loaded.chunks(), index.chunks());

        let query = "compliance certificate delivery deadline";
        let before = index.search(&embedder, query, 3).await.unwrap();
        let after = loaded.search(&embedder, query, 3).await.unwrap();
        let before: Vec<(String, f32)> = before.into_iter().map(|r| (r.chunk.content, r.score)).collect();
        let after: Vec<(String, f32)> = after.into_iter().map(|r| (r.chunk.content, r.score)).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_persist_replaces_previous_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vector_store");
        let embedder = HashedEmbedder::default();

        let first = VectorIndex::build(sample_chunks(), &embedder).await.unwrap();
        first.persist(&path).unwrap();
        let second = VectorIndex::build(sample_chunks()[..2].to_vec(), &embedder)
            .await
            .unwrap();
        second.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.build_id(), second.build_id());
        assert_eq!(loaded.len(), 2);

        // no staging or retired directories left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_swap_is_recovered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vector_store");
        let embedder = HashedEmbedder::default();

        let index = VectorIndex::build(sample_chunks(), &embedder).await.unwrap();
        index.persist(&path).unwrap();

        // crash after the old index was moved aside, plus a half-written build
        let retired = dir.path().join(format!(".vector_store.retired-{}", index.build_id()));
        fs::rename(&path, &retired).unwrap();
        let stale_staging = dir.path().join(".vector_store.staging-deadbeef");
        fs::create_dir_all(stale_staging.join(DOCSTORE_DIR)).unwrap();

        assert!(!VectorIndex::is_present(&path));
        assert!(VectorIndex::recover(&path).unwrap());
        assert!(!retired.exists());
        assert_eq!(VectorIndex::load(&path).unwrap().build_id(), index.build_id());
        assert!(!VectorIndex::recover(&path).unwrap());

        let next = VectorIndex::build(sample_chunks(), &embedder).await.unwrap();
        next.persist(&path).unwrap();
        assert!(!stale_staging.exists());
        assert_eq!(VectorIndex::load(&path).unwrap().build_id(), next.build_id());
    }

    #[test]
    fn test_recover_without_retired_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vector_store");
        assert!(!VectorIndex::recover(&path).unwrap());

        // a retired directory without a manifest is not restored
        fs::create_dir_all(dir.path().join(".vector_store.retired-partial")).unwrap();
        assert!(!VectorIndex::recover(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_index() {
        let dir = tempdir().unwrap();
        let err = VectorIndex::load(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, RagError::IndexLoad { .. }));
    }

    #[tokio::test]
    async fn test_load_corrupt_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vector_store");
        let embedder = HashedEmbedder::default();
        VectorIndex::build(sample_chunks(), &embedder)
            .await
            .unwrap()
            .persist(&path)
            .unwrap();

        fs::write(path.join(VECTORS_FILE), b"garbage").unwrap();
        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, RagError::IndexLoad { .. }));
    }

    #[test]
    fn test_dimension_mismatch_returns_nothing() {
        let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let index = VectorIndex {
            manifest: IndexManifest {
                format_version: FORMAT_VERSION,
                build_id: Uuid::new_v4(),
                built_at: Utc::now(),
                embedding_model: "test".to_string(),
                dimension: 2,
                chunk_count: 2,
            },
            chunks: sample_chunks()[..2].to_vec(),
            vectors: to_matrix(&normalized_rows(&rows, 2).unwrap(), 2).unwrap(),
        };

        assert!(index.search_by_vector(&[1.0, 0.0, 0.0], 2).is_empty());
        let results = index.search_by_vector(&[0.0, 2.0], 2);
        assert_eq!(results[0].chunk.metadata.chunk_index, 1);
    }
}
