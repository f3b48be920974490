//! Document classification and structural locators for chunks.

use super::{Chunk, ChunkMetadata, DocumentType, RawDocument};
use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

/// Only the head of a chunk is scanned for a section heading.
const SECTION_SCAN_CHARS: usize = 500;

// Checked in order, first match wins.
const CLASSIFICATION_RULES: &[(&str, DocumentType)] = &[
    ("compliance certificate", DocumentType::ComplianceCertificate),
    ("credit agreement", DocumentType::CreditAgreement),
    ("loan agreement", DocumentType::CreditAgreement),
    ("credit application", DocumentType::CreditApplication),
    ("lsta", DocumentType::LstaAgreement),
];

lazy_static! {
    static ref SECTION_PATTERNS: Vec<Regex> = [
        r"SECTION\s+(\d+\.?\d*)",
        r"Section\s+(\d+\.?\d*)",
        r"ARTICLE\s+([IVXLCDM]+|\d+)",
        r"Article\s+([IVXLCDM]+|\d+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect();
}

pub fn classify_document(text: &str) -> DocumentType {
    let lower = text.to_lowercase();
    CLASSIFICATION_RULES
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, doc_type)| *doc_type)
        .unwrap_or(DocumentType::CreditDocument)
}

/// Returns the full text of the first section/article heading near the start
/// of the chunk, e.g. `"Section 7.2"` or `"ARTICLE VI"`.
pub fn extract_section(chunk_text: &str) -> Option<String> {
    let head = match chunk_text.char_indices().nth(SECTION_SCAN_CHARS) {
        Some((byte, _)) => &chunk_text[..byte],
        None => chunk_text,
    };

    SECTION_PATTERNS
        .iter()
        .find_map(|re| re.find(head))
        .map(|m| m.as_str().to_string())
}

/// Builds chunks for the given byte ranges of `document`.
pub fn enrich(document: &RawDocument, ranges: &[Range<usize>]) -> Vec<Chunk> {
    let document_type = classify_document(&document.content);
    let source_filename = document.file_name();
    let source_path = document.source_path.to_string_lossy().to_string();
    let file_type = document.file_type();
    let total_chunks = ranges.len();

    ranges
        .iter()
        .enumerate()
        .map(|(chunk_index, range)| {
            let content = document.content[range.clone()].to_string();
            let section = extract_section(&content);
            Chunk {
                content,
                metadata: ChunkMetadata {
                    source_filename: source_filename.clone(),
                    source_path: source_path.clone(),
                    file_type: file_type.clone(),
                    document_type,
                    chunk_index,
                    total_chunks,
                    section,
                    page_number: document.page_number,
                    byte_range: range.clone(),
                },
            }
        })
        .collect()
}
