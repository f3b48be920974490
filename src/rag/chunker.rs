//! Recursive boundary chunking with overlap.
//!
//! A chunk ends at the last occurrence of the highest-priority boundary that
//! fits inside the size window; when no boundary fits, the window is cut at
//! a character boundary. Every chunk is a contiguous slice of the source, so
//! removing the overlap between neighbours reconstructs the document.

use super::{enricher, Chunk, RawDocument};
use std::ops::Range;

pub const DEFAULT_CHUNK_SIZE: usize = 1200;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, Copy)]
enum Boundary {
    /// Cut right after the separator.
    After(&'static str),
    /// Cut right before the marker, so it opens the next chunk.
    Before(&'static str),
}

// Highest priority first. The character fallback is implicit.
const BOUNDARIES: &[Boundary] = &[
    Boundary::After("\n\n"),
    Boundary::After("\n"),
    Boundary::Before("SECTION"),
    Boundary::Before("Section"),
    Boundary::Before("ARTICLE"),
    Boundary::Before("Article"),
    Boundary::After(". "),
    Boundary::After(" "),
];

#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl TextChunker {
    /// Sizes are in characters. The overlap is clamped below the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits one document into enriched chunks.
    pub fn split(&self, document: &RawDocument) -> Vec<Chunk> {
        let ranges = self.split_ranges(&document.content);
        enricher::enrich(document, &ranges)
    }

    /// Byte ranges of each chunk in `text`, in document order.
    pub fn split_ranges(&self, text: &str) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }

        // offsets[i] is the byte offset of char i; the last entry is text.len()
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = offsets.len() - 1;

        if total <= self.chunk_size {
            return vec![0..text.len()];
        }

        let mut ranges = Vec::new();
        let mut start = 0;
        loop {
            let window_end = (start + self.chunk_size).min(total);
            if window_end == total {
                ranges.push(offsets[start]..text.len());
                break;
            }

            let end = self.find_cut(text, &offsets, start, window_end);
            ranges.push(offsets[start]..offsets[end]);
            start = self.next_start(text, &offsets, start, end);
        }

        ranges
    }

    /// Char index where the chunk starting at `start` should end.
    fn find_cut(&self, text: &str, offsets: &[usize], start: usize, window_end: usize) -> usize {
        // A chunk must reach past its overlap so the next one always advances.
        let min_cut = start + self.chunk_overlap + 1;
        let base = offsets[start];
        let window = &text[base..offsets[window_end]];

        for boundary in BOUNDARIES {
            if let Some(cut) = last_boundary(window, *boundary) {
                let cut = char_index(offsets, base + cut);
                if cut >= min_cut {
                    return cut;
                }
            }
        }

        window_end
    }

    /// Char index where the chunk after `start..end` begins.
    fn next_start(&self, text: &str, offsets: &[usize], start: usize, end: usize) -> usize {
        let raw = end.saturating_sub(self.chunk_overlap).max(start + 1);
        if raw >= end || text[..offsets[raw]].ends_with(char::is_whitespace) {
            return raw;
        }

        // Skip forward to the next word so the overlap does not open mid-word.
        let tail = &text[offsets[raw]..offsets[end]];
        match tail.find(char::is_whitespace) {
            Some(pos) => {
                let ws = char_index(offsets, offsets[raw] + pos);
                if ws + 1 < end {
                    ws + 1
                } else {
                    raw
                }
            }
            None => raw,
        }
    }
}

/// Byte position of the last cut point for `boundary` inside `window`.
fn last_boundary(window: &str, boundary: Boundary) -> Option<usize> {
    match boundary {
        Boundary::After(sep) => window.rfind(sep).map(|pos| pos + sep.len()),
        Boundary::Before(marker) => window.rmatch_indices(marker).map(|(pos, _)| pos).find(|&pos| {
            // Markers only count at the start of a word ("SUBSECTION" is not one).
            pos > 0
                && !window[..pos]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_alphanumeric())
        }),
    }
}

fn char_index(offsets: &[usize], byte: usize) -> usize {
    offsets.binary_search(&byte).unwrap_or_else(|i| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn reconstruct(text: &str, ranges: &[Range<usize>]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for range in ranges {
            assert!(range.start <= covered, "gap before {:?}", range);
            if range.end > covered {
                out.push_str(&text[covered..range.end]);
                covered = range.end;
            }
        }
        out
    }

    fn agreement_text() -> String {
        let mut text = String::from("CREDIT AGREEMENT dated as of March 1, 2024\n\n");
        for article in 1..=4 {
            text.push_str(&format!("ARTICLE {}\n", article));
            for section in 1..=5 {
                text.push_str(&format!(
                    "Section {}.{} Covenants. The Borrower shall maintain a Total Leverage Ratio \
                     not exceeding 4.00x and shall deliver a Compliance Certificate within 45 days \
                     after each fiscal quarter. Failure to comply constitutes an Event of Default \
                     subject to the cure rights described herein.\n\n",
                    article, section
                ));
            }
        }
        text
    }

    #[test]
    fn test_empty_text() {
        let chunker = TextChunker::default();
        assert!(chunker.split_ranges("").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = TextChunker::default();
        let text = "Section 7.2 Leverage Ratio shall not exceed 4.00x.";
        assert_eq!(chunker.split_ranges(text), vec![0..text.len()]);
    }

    #[test]
    fn test_size_bound_and_coverage() {
        let chunker = TextChunker::default();
        let text = agreement_text();
        let ranges = chunker.split_ranges(&text);

        assert!(ranges.len() > 1);
        for range in &ranges {
            assert!(text[range.clone()].chars().count() <= 1200);
        }
        assert_eq!(reconstruct(&text, &ranges), text);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunker = TextChunker::default();
        let text = agreement_text();
        let ranges = chunker.split_ranges(&text);

        for pair in ranges.windows(2) {
            assert!(pair[1].start < pair[0].end);
            assert!(pair[1].start > pair[0].start);
            assert!(pair[1].end > pair[0].end);
        }
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let chunker = TextChunker::new(100, 10);
        let paragraph = "word ".repeat(14); // 70 chars
        let text = format!("{}\n\n{}\n\n{}", paragraph, paragraph, paragraph);
        let ranges = chunker.split_ranges(&text);

        assert!(text[ranges[0].clone()].ends_with("\n\n"));
    }

    #[test]
    fn test_section_marker_opens_next_chunk() {
        let chunker = TextChunker::new(120, 20);
        let text = format!(
            "{}Section 5.1 Negative Covenants apply to the Borrower and each Subsidiary.",
            "The Lenders agree to extend credit on the terms set forth. ".repeat(1)
        );
        let ranges = chunker.split_ranges(&text);

        assert!(ranges.len() > 1);
        assert!(text[ranges[1].clone()].contains("Section 5.1"));
        assert_eq!(reconstruct(&text, &ranges), text);
    }

    #[test]
    fn test_marker_inside_word_is_not_a_boundary() {
        assert_eq!(
            last_boundary("see SUBSECTION (a)", Boundary::Before("SECTION")),
            None
        );
        assert_eq!(
            last_boundary("see SECTION 2", Boundary::Before("SECTION")),
            Some(4)
        );
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let chunker = TextChunker::new(100, 20);
        let text = "A".repeat(1050);
        let ranges = chunker.split_ranges(&text);

        assert!(ranges.len() > 10);
        for range in &ranges {
            assert!(range.len() <= 100);
        }
        assert_eq!(reconstruct(&text, &ranges), text);
    }

    #[test]
    fn test_multibyte_text_coverage() {
        let chunker = TextChunker::new(50, 10);
        let text = "Zinssatz für Überziehung beträgt 5,25 % - fällig am Monatsende. ".repeat(12);
        let ranges = chunker.split_ranges(&text);

        for range in &ranges {
            assert!(text.is_char_boundary(range.start));
            assert!(text.is_char_boundary(range.end));
            assert!(text[range.clone()].chars().count() <= 50);
        }
        assert_eq!(reconstruct(&text, &ranges), text);
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let chunker = TextChunker::new(10, 50);
        assert_eq!(chunker.chunk_overlap(), 9);
        let text = "abcdefghij".repeat(5);
        let ranges = chunker.split_ranges(&text);
        assert_eq!(reconstruct(&text, &ranges), text);
    }

    #[test]
    fn test_split_numbers_chunks() {
        let chunker = TextChunker::new(200, 40);
        let doc = RawDocument::new(agreement_text(), PathBuf::from("docs/agreement.pdf"), Some(3));
        let chunks = chunker.split(&doc);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.total_chunks, chunks.len());
            assert_eq!(chunk.metadata.page_number, Some(3));
        }
    }
}
