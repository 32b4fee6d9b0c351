//! PDF text extraction using the `pdf-extract` crate.
//!
//! `pdf-extract` returns the whole document as one string with form feeds
//! (`\x0C`) between pages, so page ranges are cut from that split. Tables
//! are found heuristically on column-aligned lines. Raster images are not
//! extracted. Parsed pages are cached per file, so a document is read once
//! no matter how many segments it is cut into.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use coursebuilder_shared::{CourseBuilderError, Document, Result};
use coursebuilder_text::tables::detect_tables;

use crate::{DocumentExtractor, ExtractedRange, page_marker};

/// Extracts page ranges from the PDF at `Document::file_path`.
#[derive(Debug, Default)]
pub struct PdfTextExtractor {
    pages: Mutex<HashMap<PathBuf, Arc<Vec<String>>>>,
}

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages of `path`, parsed on first use and cached afterwards.
    ///
    /// The lock is held across the parse; concurrent callers wait for it.
    async fn pages(&self, path: &Path) -> Result<Arc<Vec<String>>> {
        let mut cache = self.pages.lock().await;
        if let Some(pages) = cache.get(path) {
            return Ok(Arc::clone(pages));
        }
        let pages = Arc::new(load_pages(path.to_path_buf()).await?);
        debug!(path = %path.display(), pages = pages.len(), "parsed pdf");
        cache.insert(path.to_path_buf(), Arc::clone(&pages));
        Ok(pages)
    }

    /// Number of pages `pdf-extract` sees in the file.
    pub async fn page_count(path: &Path) -> Result<u32> {
        let pages = load_pages(path.to_path_buf()).await?;
        Ok(pages.len() as u32)
    }
}

#[async_trait]
impl DocumentExtractor for PdfTextExtractor {
    #[instrument(skip_all, fields(document_id = %document.id, start_page = start_page, end_page = end_page))]
    async fn extract(
        &self,
        document: &Document,
        start_page: u32,
        end_page: u32,
    ) -> Result<ExtractedRange> {
        if start_page == 0 || end_page < start_page {
            return Err(CourseBuilderError::validation(format!(
                "invalid page range {start_page}-{end_page}"
            )));
        }

        let pages = self.pages(Path::new(&document.file_path)).await?;
        let range = slice_pages(&pages, start_page, end_page);
        debug!(pages = range.len(), "extracted page range");
        Ok(assemble_range(range))
    }
}

/// Read the PDF off the async runtime and split it into pages.
async fn load_pages(path: PathBuf) -> Result<Vec<String>> {
    tokio::task::spawn_blocking(move || {
        let bytes = std::fs::read(&path).map_err(|e| CourseBuilderError::io(&path, e))?;
        let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
            CourseBuilderError::service("pdf", format!("{}: {e}", path.display()))
        })?;
        Ok(split_pages(&text))
    })
    .await
    .map_err(|e| CourseBuilderError::service("pdf", format!("extraction task failed: {e}")))?
}

fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\x0C').map(str::to_string).collect();
    // A trailing form feed leaves an empty final piece.
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}

/// Pages `start..=end` (1-based) paired with their page numbers, clamped to
/// what exists.
fn slice_pages(pages: &[String], start: u32, end: u32) -> Vec<(u32, &str)> {
    (start..=end)
        .filter_map(|page| {
            pages
                .get(page as usize - 1)
                .map(|text| (page, text.as_str()))
        })
        .collect()
}

fn assemble_range(range: Vec<(u32, &str)>) -> ExtractedRange {
    let mut out = ExtractedRange::default();
    for (page, text) in range {
        if !out.text.is_empty() {
            out.text.push('\n');
        }
        out.text.push_str(&page_marker(page));
        out.text.push('\n');
        out.text.push_str(text.trim());
        out.text.push('\n');
        out.tables.extend(detect_tables(text, page));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_form_feeds() {
        let pages = split_pages("bir\x0Ciki\x0Cüç\x0C");
        assert_eq!(pages, vec!["bir", "iki", "üç"]);
    }

    #[test]
    fn slices_are_clamped_to_existing_pages() {
        let pages = split_pages("a\x0Cb\x0Cc");
        let range = slice_pages(&pages, 2, 9);
        assert_eq!(range, vec![(2, "b"), (3, "c")]);
    }

    #[test]
    fn range_text_has_page_markers_and_tables() {
        let page_two = "Tablo:\nTip    Boyut\nint    4\nlong   8\n";
        let out = assemble_range(vec![(1, "Giriş metni."), (2, page_two)]);
        assert!(out.text.starts_with("--- Sayfa 1 ---\nGiriş metni.\n"));
        assert!(out.text.contains("\n--- Sayfa 2 ---\n"));
        assert_eq!(out.tables.len(), 1);
        assert_eq!(out.tables[0].page, 2);
        assert!(out.images.is_empty());
    }

    #[tokio::test]
    async fn rejects_inverted_range() {
        let doc = Document::new("local", "x", "/nonexistent.pdf", 10);
        let err = PdfTextExtractor::new().extract(&doc, 5, 2).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::Validation { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let doc = Document::new("local", "x", "/nonexistent/kitap.pdf", 10);
        let err = PdfTextExtractor::new().extract(&doc, 1, 2).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::Io { .. }));
    }

    #[tokio::test]
    async fn cached_pages_are_reused_across_extractions() {
        let extractor = PdfTextExtractor::new();
        let path = PathBuf::from("/nonexistent/onbellek.pdf");
        extractor
            .pages
            .lock()
            .await
            .insert(path.clone(), Arc::new(split_pages("bir\x0Ciki\x0Cüç")));

        // The file does not exist, so any re-read would fail with Io.
        let doc = Document::new("local", "x", "/nonexistent/onbellek.pdf", 3);
        let first = extractor.extract(&doc, 1, 1).await.unwrap();
        let second = extractor.extract(&doc, 2, 3).await.unwrap();
        assert!(first.text.contains("bir"));
        assert!(second.text.contains("--- Sayfa 3 ---\nüç"));
        assert_eq!(extractor.pages.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_parse_is_not_cached() {
        let extractor = PdfTextExtractor::new();
        let doc = Document::new("local", "x", "/nonexistent/kitap.pdf", 10);
        assert!(extractor.extract(&doc, 1, 1).await.is_err());
        assert!(extractor.pages.lock().await.is_empty());
    }
}
