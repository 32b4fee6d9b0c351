//! Knowledge base integration of generated chapters.
//!
//! For each chapter: store every lesson as a plain-text blob (with an
//! embedding when an embedder is configured), extract keyword concepts per
//! lesson, and derive co-occurrence relationships across the chapter.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use coursebuilder_services::Embedder;
use coursebuilder_shared::{
    ChapterContent, Concept, ConceptRelationship, EnhancedLesson, Result, new_id,
};
use coursebuilder_storage::{Storage, StoredContentSegment};
use coursebuilder_text::{
    KeywordExtractor, char_len, contains_term, count_occurrences, first_sentence_containing,
    tables::to_pipe_text,
};

const CONCEPTS_PER_LESSON: usize = 5;
const RELATION_KEYWORDS_PER_LESSON: usize = 3;
const DESCRIPTION_CHARS: usize = 95;
const RELATION_THRESHOLD: f64 = 0.3;
const BOTH_PRESENT: f64 = 0.8;
const ONE_PRESENT: f64 = 0.2;

/// What one integration run stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrationReport {
    pub segments_stored: usize,
    pub embedded: usize,
    pub concepts: usize,
    pub relationships: usize,
}

pub struct KnowledgeIntegrator {
    storage: Arc<Storage>,
    keywords: Arc<dyn KeywordExtractor>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl KnowledgeIntegrator {
    pub fn new(
        storage: Arc<Storage>,
        keywords: Arc<dyn KeywordExtractor>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            storage,
            keywords,
            embedder,
        }
    }

    #[instrument(skip_all, fields(document_id = %document_id, chapter = %chapter.chapter_id))]
    pub async fn integrate(&self, document_id: &str, chapter: &ChapterContent) -> Result<IntegrationReport> {
        let mut report = IntegrationReport::default();
        let blobs: Vec<String> = chapter.lessons.iter().map(lesson_blob).collect();

        for (lesson, blob) in chapter.lessons.iter().zip(&blobs) {
            let embedding = self.embed(blob).await;
            if embedding.is_some() {
                report.embedded += 1;
            }
            self.storage
                .upsert_content_segment(&StoredContentSegment {
                    document_id: document_id.to_string(),
                    chapter_id: chapter.chapter_id.clone(),
                    lesson_id: lesson.lesson_id.clone(),
                    content: blob.clone(),
                    metadata: json!({
                        "chapter_title": chapter.chapter_title,
                        "lesson_title": lesson.title,
                        "content_type": "lesson",
                    }),
                    embedding,
                })
                .await?;
            report.segments_stored += 1;

            for concept in self.extract_concepts(document_id, &chapter.chapter_id, &lesson.lesson_id, blob) {
                self.storage.insert_concept(&concept).await?;
                report.concepts += 1;
            }
        }

        let candidates = relation_candidates(self.keywords.as_ref(), &blobs);
        for (a, b, score) in score_relationships(&candidates, &blobs) {
            if score <= RELATION_THRESHOLD {
                continue;
            }
            self.storage
                .insert_relationship(&ConceptRelationship {
                    id: new_id(),
                    concept_a: a,
                    concept_b: b,
                    score,
                    document_id: document_id.to_string(),
                    chapter_id: chapter.chapter_id.clone(),
                    created_at: Utc::now(),
                })
                .await?;
            report.relationships += 1;
        }

        debug!(?report, "integrated chapter into knowledge base");
        Ok(report)
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "embedding failed, storing lesson without vector");
                None
            }
        }
    }

    fn extract_concepts(&self, document_id: &str, chapter_id: &str, lesson_id: &str, blob: &str) -> Vec<Concept> {
        let length = char_len(blob);
        self.keywords
            .extract(blob, CONCEPTS_PER_LESSON)
            .into_iter()
            .map(|keyword| {
                let description = first_sentence_containing(blob, &keyword, DESCRIPTION_CHARS)
                    .unwrap_or_else(|| format!("{keyword} kavramı bu derste ele alınmaktadır."));
                Concept {
                    id: new_id(),
                    relevance_score: relevance(count_occurrences(blob, &keyword), length),
                    name: keyword,
                    description,
                    document_id: document_id.to_string(),
                    chapter_id: chapter_id.to_string(),
                    lesson_id: lesson_id.to_string(),
                    created_at: Utc::now(),
                }
            })
            .collect()
    }
}

/// Normalized term frequency scaled by 100, clamped to `[0, 1]`.
pub fn relevance(occurrences: usize, text_chars: usize) -> f64 {
    if text_chars == 0 {
        return 0.0;
    }
    (occurrences as f64 / text_chars as f64 * 100.0).min(1.0)
}

/// Every content field of a lesson as one plain-text blob.
pub fn lesson_blob(lesson: &EnhancedLesson) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !lesson.title.is_empty() {
        parts.push(lesson.title.clone());
    }
    if !lesson.explanatory_text.is_empty() {
        parts.push(lesson.explanatory_text.clone());
    }
    if !lesson.key_points.is_empty() {
        parts.push(
            lesson
                .key_points
                .iter()
                .map(|p| format!("- {p}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    parts.extend(lesson.tables.iter().map(to_pipe_text).filter(|t| !t.is_empty()));
    for example in &lesson.code_examples {
        parts.push(
            [&example.title, &example.code, &example.explanation]
                .into_iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    for example in &lesson.practical_examples {
        parts.push(format!("{}: {}", example.title, example.description).trim_start_matches(": ").to_string());
    }
    for reference in &lesson.cross_references {
        parts.push(format!("{} {}", reference.target, reference.description).trim().to_string());
    }
    if !lesson.summary.is_empty() {
        parts.push(lesson.summary.clone());
    }
    parts.retain(|p| !p.trim().is_empty());
    parts.join("\n\n")
}

/// Up to three keywords per lesson, first occurrence wins.
fn relation_candidates(keywords: &dyn KeywordExtractor, blobs: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    blobs
        .iter()
        .flat_map(|blob| keywords.extract(blob, RELATION_KEYWORDS_PER_LESSON))
        .filter(|kw| seen.insert(kw.clone()))
        .collect()
}

/// Mean co-occurrence score of every unordered keyword pair over `blobs`.
pub fn score_relationships(keywords: &[String], blobs: &[String]) -> Vec<(String, String, f64)> {
    if blobs.is_empty() {
        return Vec::new();
    }
    let mut scored = Vec::new();
    for (i, a) in keywords.iter().enumerate() {
        for b in &keywords[i + 1..] {
            let total: f64 = blobs
                .iter()
                .map(|blob| match (contains_term(blob, a), contains_term(blob, b)) {
                    (true, true) => BOTH_PRESENT,
                    (true, false) | (false, true) => ONE_PRESENT,
                    (false, false) => 0.0,
                })
                .sum();
            scored.push((a.clone(), b.clone(), total / blobs.len() as f64));
        }
    }
    scored
}
