use super::{file_type_of, RawDocument};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use docx_rs::{
    DocumentChild, ParagraphChild, RunChild, TableCellContent, TableChild, TableRowChild,
};
use futures::stream::{self, StreamExt};
use pdf_extract::extract_text;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files parsed concurrently on the blocking pool during a directory load.
const LOAD_CONCURRENCY: usize = 4;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// A file that could not be turned into documents.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of loading a directory: everything that parsed, plus what did not.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<RawDocument>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn file_count(&self) -> usize {
        let mut paths: Vec<&PathBuf> = self.documents.iter().map(|d| &d.source_path).collect();
        paths.dedup();
        paths.len()
    }
}

/// Source of raw document text for an index build.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Loads every supported file below `dir`. Never fails as a whole;
    /// per-file problems are reported in [`LoadReport::failures`].
    async fn load_directory(&self, dir: &Path) -> LoadReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Pdf,
    Docx,
    Text,
}

fn file_kind(path: &Path) -> Option<FileKind> {
    match file_type_of(path).as_str() {
        "pdf" => return Some(FileKind::Pdf),
        "docx" => return Some(FileKind::Docx),
        "txt" => return Some(FileKind::Text),
        _ => {}
    }

    match mime_guess::from_path(path).first_raw() {
        Some("application/pdf") => Some(FileKind::Pdf),
        Some(DOCX_MIME) => Some(FileKind::Docx),
        _ => None,
    }
}

/// Loads PDF (one document per page), DOCX and plain-text files from disk.
#[derive(Debug, Default, Clone)]
pub struct FileSystemLoader;

impl FileSystemLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentLoader for FileSystemLoader {
    async fn load_directory(&self, dir: &Path) -> LoadReport {
        info!(dir = %dir.display(), "Loading documents");
        let mut report = LoadReport::default();

        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Documents directory does not exist");
            report.failures.push(LoadFailure {
                path: dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
            return report;
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| file_kind(path).is_some())
            .collect();
        paths.sort();

        let results: Vec<(PathBuf, Result<Vec<RawDocument>>)> = stream::iter(paths)
            .map(|path| async move {
                let task_path = path.clone();
                let result = tokio::task::spawn_blocking(move || load_file(&task_path))
                    .await
                    .unwrap_or_else(|e| {
                        Err(RagError::LoaderFile {
                            path: path.clone(),
                            reason: format!("loader task failed: {}", e),
                        })
                    });
                (path, result)
            })
            .buffered(LOAD_CONCURRENCY)
            .collect()
            .await;

        for (path, result) in results {
            match result {
                Ok(documents) => {
                    debug!(path = %path.display(), documents = documents.len(), "Loaded file");
                    report.documents.extend(documents);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping document");
                    let reason = match e {
                        RagError::LoaderFile { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    report.failures.push(LoadFailure { path, reason });
                }
            }
        }

        info!(
            documents = report.documents.len(),
            files = report.file_count(),
            failures = report.failures.len(),
            "Finished loading documents"
        );
        report
    }
}

/// Extracts the documents contained in one file. Blank pages are dropped.
pub fn load_file(path: &Path) -> Result<Vec<RawDocument>> {
    let kind = file_kind(path).ok_or_else(|| RagError::LoaderFile {
        path: path.to_path_buf(),
        reason: "unsupported file type".to_string(),
    })?;

    let documents = match kind {
        FileKind::Pdf => load_pdf(path)?,
        FileKind::Docx => load_docx(path)?,
        FileKind::Text => {
            let text = fs::read_to_string(path).map_err(|e| loader_error(path, e))?;
            vec![RawDocument::new(text, path.to_path_buf(), None)]
        }
    };

    Ok(documents
        .into_iter()
        .filter(|doc| !doc.content.trim().is_empty())
        .collect())
}

fn loader_error(path: &Path, reason: impl ToString) -> RagError {
    RagError::LoaderFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn load_pdf(path: &Path) -> Result<Vec<RawDocument>> {
    let mut documents = Vec::new();

    match lopdf::Document::load(path) {
        Ok(pdf) => {
            for page_number in pdf.get_pages().keys() {
                match pdf.extract_text(&[*page_number]) {
                    Ok(text) => documents.push(RawDocument::new(
                        text,
                        path.to_path_buf(),
                        Some(*page_number),
                    )),
                    Err(e) => {
                        debug!(path = %path.display(), page = page_number, error = %e, "Page text extraction failed")
                    }
                }
            }
        }
        Err(e) => debug!(path = %path.display(), error = %e, "Per-page PDF parsing failed"),
    }

    if documents.iter().all(|doc| doc.content.trim().is_empty()) {
        // Fall back to whole-file extraction, losing page numbers.
        let text = extract_text(path)
            .map_err(|e| loader_error(path, format!("failed to extract PDF text: {}", e)))?;
        return Ok(vec![RawDocument::new(text, path.to_path_buf(), None)]);
    }

    Ok(documents)
}

// Table rows and cells are single-variant enums in docx-rs.
#[allow(irrefutable_let_patterns)]
fn load_docx(path: &Path) -> Result<Vec<RawDocument>> {
    let bytes = fs::read(path).map_err(|e| loader_error(path, e))?;
    let docx = docx_rs::read_docx(&bytes)
        .map_err(|e| loader_error(path, format!("failed to parse DOCX: {}", e)))?;

    let mut text = String::new();
    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(paragraph) => {
                push_paragraph(&mut text, &paragraph.children);
            }
            DocumentChild::Table(table) => {
                for row_child in &table.rows {
                    let mut cells = Vec::new();
                    if let TableChild::TableRow(row) = row_child {
                        for cell_child in &row.cells {
                            if let TableRowChild::TableCell(cell) = cell_child {
                                let mut cell_text = String::new();
                                for content in &cell.children {
                                    if let TableCellContent::Paragraph(paragraph) = content {
                                        push_paragraph(&mut cell_text, &paragraph.children);
                                    }
                                }
                                cells.push(cell_text.trim().to_string());
                            }
                        }
                    }
                    text.push_str(&cells.join("\t"));
                    text.push('\n');
                }
            }
            _ => {}
        }
    }

    Ok(vec![RawDocument::new(text, path.to_path_buf(), None)])
}

fn push_paragraph(out: &mut String, children: &[ParagraphChild]) {
    for child in children {
        if let ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                match run_child {
                    RunChild::Text(t) => out.push_str(&t.text),
                    RunChild::Tab(_) => out.push('\t'),
                    RunChild::Break(_) => out.push('\n'),
                    _ => {}
                }
            }
        }
    }
    out.push('\n');
}
