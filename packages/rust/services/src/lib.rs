//! External collaborator contracts for CourseBuilder.
//!
//! The pipeline never talks to a vendor directly. Every external capability
//! is a trait object constructed once at startup and passed to the stages:
//!
//! - [`TextCompletion`]: prompt in, free-form text out
//! - [`Embedder`]: text in, vector out
//! - [`SemanticSearch`]: scored retrieval over stored content
//! - [`ImageGenerator`]: prompt in, hosted image URL out
//! - [`SpeechSynthesizer`]: text in, raw 16-bit mono PCM out
//! - [`DocumentExtractor`]: page range in, text/images/tables out
//!
//! [`http::HttpAiClient`] implements the AI contracts against an
//! OpenAI-compatible endpoint; [`pdf::PdfTextExtractor`] implements
//! extraction with `pdf-extract`.

pub mod http;
pub mod pdf;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use coursebuilder_shared::{Document, ExtractedImage, ExtractedTable, Result};

pub use http::HttpAiClient;
pub use pdf::PdfTextExtractor;

// ---------------------------------------------------------------------------
// Text completion and embeddings
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Complete `prompt`. Output may be wrapped in Markdown code fences.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Identifier of the model answering, used as part of cache keys.
    fn model_id(&self) -> &str;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ---------------------------------------------------------------------------
// Semantic search
// ---------------------------------------------------------------------------

/// Filters applied by a [`SemanticSearch`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum similarity in `[0, 1]`.
    pub threshold: f32,
    /// Restrict results to one document.
    pub document_id: Option<String>,
}

/// One retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub similarity: f32,
    /// Human-readable origin (lesson title, lesson id, ...).
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Hits at or above `options.threshold`, most similar first, at most
    /// `options.limit` of them.
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>>;
}

// ---------------------------------------------------------------------------
// Images and speech
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const LANDSCAPE: Self = Self {
        width: 1792,
        height: 1024,
    };
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    pub model: String,
    pub generation_time_secs: f64,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<GeneratedImage>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Raw little-endian 16-bit mono PCM at [`Self::sample_rate`].
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;

    fn sample_rate(&self) -> u32;
}

// ---------------------------------------------------------------------------
// Document extraction
// ---------------------------------------------------------------------------

/// Content of an inclusive page range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedRange {
    /// Plain text with `--- Sayfa N ---` page markers.
    pub text: String,
    pub images: Vec<ExtractedImage>,
    /// Best-effort; may be empty or contain false positives.
    pub tables: Vec<ExtractedTable>,
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, document: &Document, start_page: u32, end_page: u32)
    -> Result<ExtractedRange>;
}

/// Page boundary marker placed before each page's text.
pub fn page_marker(page: u32) -> String {
    format!("--- Sayfa {page} ---")
}
