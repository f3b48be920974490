pub mod chunker;
pub mod documents;
pub mod embeddings;
pub mod enricher;
pub mod generator;
pub mod refresh;
pub mod search;
pub mod service;
pub mod vector_store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Text extracted from one file (or one page of a paginated file).
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub content: String,
    pub source_path: PathBuf,
    pub page_number: Option<u32>,
}

impl RawDocument {
    pub fn new(content: String, source_path: PathBuf, page_number: Option<u32>) -> Self {
        Self {
            content,
            source_path,
            page_number,
        }
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    }

    /// Lowercase extension without the leading dot.
    pub fn file_type(&self) -> String {
        file_type_of(&self.source_path)
    }
}

pub(crate) fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Kind of credit document, decided from its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "Compliance Certificate")]
    ComplianceCertificate,
    #[serde(rename = "Credit Agreement")]
    CreditAgreement,
    #[serde(rename = "Credit Application")]
    CreditApplication,
    #[serde(rename = "LSTA Agreement")]
    LstaAgreement,
    #[serde(rename = "Credit Document")]
    CreditDocument,
}

impl DocumentType {
    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::ComplianceCertificate => "Compliance Certificate",
            DocumentType::CreditAgreement => "Credit Agreement",
            DocumentType::CreditApplication => "Credit Application",
            DocumentType::LstaAgreement => "LSTA Agreement",
            DocumentType::CreditDocument => "Credit Document",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_filename: String,
    pub source_path: String,
    pub file_type: String,
    pub document_type: DocumentType,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub section: Option<String>,
    pub page_number: Option<u32>,
    /// Byte offsets of the chunk inside its source document.
    pub byte_range: Range<usize>,
}

/// Unit of retrieval: a bounded slice of a document plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}
