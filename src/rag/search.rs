use super::embeddings::Embedder;
use super::vector_store::VectorIndex;
use super::{DocumentType, SearchResult};
use crate::config::DEFAULT_TOP_K;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const NOT_FOUND_ANSWER: &str = "I cannot find that in the documents available.";
const PREVIEW_CHARS: usize = 200;

/// Where an answer came from, one per retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub filename: String,
    pub page: Option<u32>,
    pub section: Option<String>,
    pub document_type: DocumentType,
    pub content_preview: String,
}

impl SourceCitation {
    pub fn from_result(result: &SearchResult) -> Self {
        let metadata = &result.chunk.metadata;
        Self {
            filename: metadata.source_filename.clone(),
            page: metadata.page_number,
            section: metadata.section.clone(),
            document_type: metadata.document_type,
            content_preview: preview(&result.chunk.content),
        }
    }
}

/// First 200 characters, with "..." appended when something was cut.
fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((byte, _)) => format!("{}...", &content[..byte]),
        None => content.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub timestamp: DateTime<Utc>,
}

impl QueryResult {
    pub fn answered(answer: String, results: &[SearchResult]) -> Self {
        Self {
            answer,
            sources: results.iter().map(SourceCitation::from_result).collect(),
            timestamp: Utc::now(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            answer: NOT_FOUND_ANSWER.to_string(),
            sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(error: impl std::fmt::Display) -> Self {
        Self {
            answer: format!("I encountered an error processing your question: {}", error),
            sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Top-k similarity retrieval over a built index.
#[derive(Debug, Clone, Copy)]
pub struct Retriever {
    top_k: usize,
}

impl Default for Retriever {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}

impl Retriever {
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        embedder: &dyn Embedder,
        question: &str,
    ) -> Result<Vec<SearchResult>> {
        let results = index.search(embedder, question, self.top_k).await?;
        debug!(
            requested = self.top_k,
            returned = results.len(),
            best = results.first().map(|r| r.score),
            "Retrieved chunks"
        );
        Ok(results)
    }
}

/// Retrieved chunk texts in rank order, separated by blank lines.
pub fn build_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| r.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embeddings::HashedEmbedder;
    use crate::rag::{Chunk, ChunkMetadata};

    fn chunk(content: &str, section: Option<&str>, page: Option<u32>) -> Chunk {
        Chunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source_filename: "Acme Credit Agreement.pdf".to_string(),
                source_path: "/docs/Acme Credit Agreement.pdf".to_string(),
                file_type: "pdf".to_string(),
                document_type: DocumentType::CreditAgreement,
                chunk_index: 0,
                total_chunks: 1,
                section: section.map(str::to_string),
                page_number: page,
                byte_range: 0..content.len(),
            },
        }
    }

    #[test]
    fn test_citation_from_result() {
        let result = SearchResult {
            chunk: chunk("Section 7.2 Leverage Ratio", Some("Section 7.2"), Some(41)),
            score: 0.9,
        };
        let citation = SourceCitation::from_result(&result);

        assert_eq!(citation.filename, "Acme Credit Agreement.pdf");
        assert_eq!(citation.page, Some(41));
        assert_eq!(citation.section.as_deref(), Some("Section 7.2"));
        assert_eq!(citation.document_type, DocumentType::CreditAgreement);
        assert_eq!(citation.content_preview, "Section 7.2 Leverage Ratio");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(250);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 203);
        assert!(p.ends_with("..."));

        let exact = "a".repeat(200);
        assert_eq!(preview(&exact), exact);
    }

    #[test]
    fn test_query_result_json_shape() {
        let result = SearchResult {
            chunk: chunk("Applicable Margin", None, None),
            score: 0.5,
        };
        let value = serde_json::to_value(QueryResult::answered("ok".into(), &[result])).unwrap();

        assert_eq!(value["answer"], "ok");
        assert_eq!(value["sources"][0]["document_type"], "Credit Agreement");
        assert!(value["sources"][0]["page"].is_null());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_degraded_results() {
        let not_found = QueryResult::not_found();
        assert_eq!(not_found.answer, NOT_FOUND_ANSWER);
        assert!(not_found.sources.is_empty());

        let error = QueryResult::error("timeout");
        assert_eq!(
            error.answer,
            "I encountered an error processing your question: timeout"
        );
        assert!(error.sources.is_empty());
    }

    #[test]
    fn test_build_context_joins_in_order() {
        let results = vec![
            SearchResult { chunk: chunk("first", None, None), score: 0.9 },
            SearchResult { chunk: chunk("second", None, None), score: 0.8 },
        ];
        assert_eq!(build_context(&results), "first\n\nsecond");
    }

    #[tokio::test]
    async fn test_retrieve_limits_to_top_k() {
        let embedder = HashedEmbedder::default();
        let chunks = vec![
            chunk("Leverage Ratio shall not exceed 4.00x", Some("Section 7.2"), None),
            chunk("Interest Coverage Ratio of at least 3.00x", None, None),
            chunk("Notices by registered mail", None, None),
        ];
        let index = VectorIndex::build(chunks, &embedder).await.unwrap();

        let results = Retriever::new(2)
            .retrieve(&index, &embedder, "maximum leverage ratio")
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].chunk.content.contains("Leverage Ratio"));
    }
}
