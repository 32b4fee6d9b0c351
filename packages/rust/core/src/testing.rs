//! In-crate fakes of the service traits and storage fixtures for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use coursebuilder_services::{
    DocumentExtractor, Embedder, ExtractedRange, GeneratedImage, ImageGenerator, ImageSize,
    SearchHit, SearchOptions, SemanticSearch, SpeechSynthesizer, TextCompletion, page_marker,
};
use coursebuilder_shared::{
    Chapter, CourseBuilderError, CourseStructure, Document, ExtractedImage, Lesson, Result,
    Segment,
};
use coursebuilder_storage::Storage;

// ---------------------------------------------------------------------------
// Storage fixtures
// ---------------------------------------------------------------------------

pub async fn temp_storage() -> Arc<Storage> {
    let tmp = std::env::temp_dir().join(format!("cb_test_{}.db", Uuid::now_v7()));
    Arc::new(Storage::open(&tmp).await.expect("open test db"))
}

/// Insert a document and one segment per page range, numbered from 1.
pub async fn seeded_segments(storage: &Storage, ranges: &[(u32, u32)]) -> (Document, Vec<Segment>) {
    let pages = ranges.iter().map(|&(_, end)| end).max().unwrap_or(1);
    let doc = Document::new("local", "Programlamaya Giriş", "/tmp/kitap.pdf", pages);
    storage.insert_document(&doc).await.expect("insert document");

    let segments: Vec<Segment> = ranges
        .iter()
        .enumerate()
        .map(|(i, &(start, end))| {
            let mut seg = Segment::planned(&doc.id, format!("Bölüm {}", i + 1), start, end, "text", vec![]);
            seg.seg_no = i as u32 + 1;
            seg
        })
        .collect();
    if !segments.is_empty() {
        storage
            .replace_segments(&doc.id, &segments)
            .await
            .expect("insert segments");
    }
    (doc, segments)
}

/// Three chapters of two lessons each (`ch-N`, `ch-N-l-M`). Lesson `k`
/// references `segment_ids[k % len]` when ids are given.
pub fn sample_structure(segment_ids: &[&str]) -> CourseStructure {
    let titles = ["Giriş", "Değişkenler ve Veri Türleri", "Döngüler"];
    let mut k = 0usize;
    let chapters = titles
        .iter()
        .enumerate()
        .map(|(c, title)| Chapter {
            id: format!("ch-{}", c + 1),
            title: (*title).to_string(),
            description: String::new(),
            lessons: (0..2)
                .map(|l| {
                    let segment_ids = if segment_ids.is_empty() {
                        Vec::new()
                    } else {
                        vec![segment_ids[k % segment_ids.len()].to_string()]
                    };
                    k += 1;
                    Lesson {
                        id: format!("ch-{}-l-{}", c + 1, l + 1),
                        title: format!("{title} {}", l + 1),
                        segment_ids,
                        content_type: "text".into(),
                        learning_points: vec![],
                    }
                })
                .collect(),
        })
        .collect();
    CourseStructure {
        title: "Programlamaya Giriş".into(),
        description: String::new(),
        chapters,
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Produces marked page text and one image per range.
#[derive(Default)]
pub struct FakeExtractor {
    fail_from_page: Option<u32>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    /// Fail every range reaching `page` or beyond.
    pub fn failing_from_page(page: u32) -> Self {
        Self {
            fail_from_page: Some(page),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentExtractor for FakeExtractor {
    async fn extract(&self, _document: &Document, start_page: u32, end_page: u32) -> Result<ExtractedRange> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_from_page.is_some_and(|p| end_page >= p) {
            return Err(CourseBuilderError::service("extraction", "unreadable page"));
        }
        let text = (start_page..=end_page)
            .map(|p| format!("{}\nDeğişken tanımı sayfa {p}. Değişkenler değer saklar.", page_marker(p)))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ExtractedRange {
            text,
            images: vec![ExtractedImage {
                page: start_page,
                width: 640,
                height: 480,
                description: Some(format!("Şekil {start_page}")),
            }],
            tables: vec![],
        })
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Text completion answering from a closure or a script.
pub struct FakeCompletion {
    responder: Responder,
    prompts: Mutex<Vec<String>>,
}

impl FakeCompletion {
    pub fn responding(f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(f),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer with `responses` in order, then fail.
    pub fn scripted(responses: Vec<Result<String>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::responding(move |_| {
            queue
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Err(CourseBuilderError::service("completion", "script exhausted")))
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl TextCompletion for FakeCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().expect("prompts lock").push(prompt.to_string());
        (self.responder)(prompt)
    }

    fn model_id(&self) -> &str {
        "fake-model"
    }
}

// ---------------------------------------------------------------------------
// Search and embeddings
// ---------------------------------------------------------------------------

pub struct FakeEmbedder {
    vector: Vec<f32>,
}

impl FakeEmbedder {
    pub fn constant(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.vector.clone())
    }
}

pub struct FakeSearch {
    hits: Vec<SearchHit>,
}

impl FakeSearch {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl SemanticSearch for FakeSearch {
    async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<Vec<SearchHit>> {
        Ok(self.hits.clone())
    }
}

// ---------------------------------------------------------------------------
// Images and speech
// ---------------------------------------------------------------------------

/// Fails prompts containing `fail_marker`.
#[derive(Default)]
pub struct FakeImages {
    fail_marker: Option<String>,
    calls: AtomicUsize,
}

impl FakeImages {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<GeneratedImage> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_marker.as_deref().is_some_and(|m| prompt.contains(m)) {
            return Err(CourseBuilderError::service("images", "content policy"));
        }
        Ok(GeneratedImage {
            url: format!("https://img.test/{n}-{size}.png"),
            model: "fake-image".into(),
            generation_time_secs: 0.5,
        })
    }
}

pub struct FakeSpeech;

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>> {
        Ok(vec![0u8; text.chars().count() * 2])
    }

    fn sample_rate(&self) -> u32 {
        24_000
    }
}
