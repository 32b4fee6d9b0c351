//! Enhanced content generation, one completion call per chapter.
//!
//! Chapters are generated strictly in order. Each chapter's prompt carries
//! the source text of every segment its lessons reference plus the RAG
//! context built from earlier chapters and the knowledge base, which the
//! chapter then feeds in turn.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use coursebuilder_services::DocumentExtractor;
use coursebuilder_shared::{
    Chapter, ChapterContent, ChapterMetadata, CourseBuilderError, CourseStructure, Document,
    DocumentStatus, EnhancedContent, EnhancedLesson, GenerationConfig, Result, Segment,
};
use coursebuilder_storage::Storage;
use coursebuilder_text::tables::to_markdown;

use crate::completion::{PURPOSE_CHAPTER, StructuredCompletion};
use crate::context::ContextBuilder;
use crate::knowledge::KnowledgeIntegrator;
use crate::pipeline::ServiceSet;
use crate::prompts::chapter_content_prompt;
use crate::quality::assess_content;
use crate::retry::RetryPolicy;
use crate::worker::extract_segment_text;

/// Decoded chapter reply. `lessons` is required.
#[derive(Debug, Deserialize)]
struct ChapterPayload {
    lessons: Vec<EnhancedLesson>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterFailure {
    pub chapter_id: String,
    pub error: String,
}

/// Result of generating a whole document.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub content: EnhancedContent,
    pub failed_chapters: Vec<ChapterFailure>,
    /// Best-effort steps that failed without failing the run.
    pub warnings: Vec<String>,
}

/// Source text gathered for one chapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterSource {
    pub text: String,
    pub segment_count: usize,
}

pub struct ContentGenerator {
    storage: Arc<Storage>,
    extractor: Arc<dyn DocumentExtractor>,
    completion: StructuredCompletion,
    context: ContextBuilder,
    knowledge: KnowledgeIntegrator,
}

impl ContentGenerator {
    pub fn new(storage: Arc<Storage>, services: &ServiceSet, config: &GenerationConfig) -> Self {
        Self {
            extractor: services.extractor.clone(),
            completion: StructuredCompletion::new(
                storage.clone(),
                services.completion.clone(),
                RetryPolicy::from_config(config),
            ),
            context: ContextBuilder::new(
                storage.clone(),
                services.search.clone(),
                services.keywords.clone(),
                config.context_budget,
            ),
            knowledge: KnowledgeIntegrator::new(
                storage.clone(),
                services.keywords.clone(),
                services.embedder.clone(),
            ),
            storage,
        }
    }

    /// Generate, integrate, assess, and store content for every chapter.
    ///
    /// Failed chapters are reported and skipped; the run fails only when no
    /// chapter succeeds.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn generate_document(&self, document_id: &str) -> Result<GenerationReport> {
        let document = self.storage.require_document(document_id).await?;
        let structure = document.course_structure.clone().ok_or_else(|| {
            CourseBuilderError::validation(format!("document {document_id} has no course structure"))
        })?;
        if structure.chapters.is_empty() {
            return Err(CourseBuilderError::validation(format!(
                "document {document_id} has an empty course structure"
            )));
        }

        let mut chapters = Vec::with_capacity(structure.chapters.len());
        let mut failed_chapters = Vec::new();
        let mut warnings = Vec::new();
        let mut first_error = None;

        for chapter in &structure.chapters {
            match self.generate_for(&document, chapter, &structure).await {
                Ok(content) => {
                    if let Err(e) = self.knowledge.integrate(document_id, &content).await {
                        warn!(chapter = %chapter.id, error = %e, "knowledge base integration failed");
                        warnings.push(format!("{}: bilgi tabanı güncellenemedi: {e}", chapter.id));
                    }
                    chapters.push(content);
                }
                Err(e) => {
                    warn!(chapter = %chapter.id, error = %e, "chapter generation failed");
                    failed_chapters.push(ChapterFailure {
                        chapter_id: chapter.id.clone(),
                        error: e.to_string(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        if chapters.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                CourseBuilderError::validation("no chapter content was generated")
            }));
        }

        let quality = assess_content(&chapters);
        let content = EnhancedContent {
            chapters,
            quality: Some(quality),
            generated_at: Some(Utc::now()),
        };
        self.storage.set_enhanced_content(document_id, &content).await?;
        self.storage
            .update_document_status(document_id, DocumentStatus::EnhancedContentGenerated)
            .await?;

        info!(
            chapters = content.chapters.len(),
            failed = failed_chapters.len(),
            score = content.quality.as_ref().map(|q| q.overall_score).unwrap_or_default(),
            "enhanced content generated"
        );
        Ok(GenerationReport {
            content,
            failed_chapters,
            warnings,
        })
    }

    /// Generate all lessons of `chapter` in one completion call.
    pub async fn generate_chapter_content(
        &self,
        document_id: &str,
        chapter: &Chapter,
        structure: &CourseStructure,
    ) -> Result<ChapterContent> {
        let document = self.storage.require_document(document_id).await?;
        self.generate_for(&document, chapter, structure).await
    }

    #[instrument(skip_all, fields(chapter = %chapter.id))]
    async fn generate_for(
        &self,
        document: &Document,
        chapter: &Chapter,
        structure: &CourseStructure,
    ) -> Result<ChapterContent> {
        let source = self.gather_source_text(document, chapter).await?;
        let context = self
            .context
            .build_context(&document.id, chapter, structure, &source.text)
            .await?;

        let prompt = chapter_content_prompt(chapter, &source.text, &context.context);
        let reply = self
            .completion
            .request::<ChapterPayload>(&document.id, PURPOSE_CHAPTER, &prompt)
            .await?;

        let lessons = normalize_lessons(chapter, reply.value.lessons);
        info!(lessons = lessons.len(), cache_hit = reply.cache_hit, "chapter generated");

        Ok(ChapterContent {
            chapter_id: chapter.id.clone(),
            chapter_title: chapter.title.clone(),
            lessons,
            metadata: ChapterMetadata {
                segment_count: source.segment_count,
                context_length: context.length,
                context_components: context.components,
                model: self.completion.model_id().to_string(),
                cache_hit: reply.cache_hit,
                generated_at: Some(Utc::now()),
            },
        })
    }

    /// Concatenate the text of every segment referenced by the chapter,
    /// extracting segments that have no text yet.
    pub async fn gather_source_text(&self, document: &Document, chapter: &Chapter) -> Result<ChapterSource> {
        let mut seen = HashSet::new();
        let ids: Vec<&str> = chapter
            .lessons
            .iter()
            .flat_map(|l| l.segment_ids.iter().map(String::as_str))
            .filter(|id| seen.insert(*id))
            .collect();

        let mut source = ChapterSource::default();
        let mut blocks = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(segment) = self.storage.get_segment(id).await? else {
                warn!(segment_id = id, "lesson references unknown segment");
                continue;
            };
            let text = match &segment.text {
                Some(text) => text.clone(),
                None => match extract_segment_text(&self.storage, self.extractor.as_ref(), document, &segment).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(segment_id = id, error = %e, "lazy extraction failed, skipping segment");
                        continue;
                    }
                },
            };
            // Reload to pick up tables and images stored by the extraction.
            let segment = if segment.text.is_none() {
                self.storage.get_segment(id).await?.unwrap_or(segment)
            } else {
                segment
            };
            blocks.push(render_segment(&segment, &text));
            source.segment_count += 1;
        }
        source.text = blocks.join("\n\n");
        Ok(source)
    }
}

/// `## title`, the text, tables as Markdown, and one line per image.
pub fn render_segment(segment: &Segment, text: &str) -> String {
    let mut out = format!("## {}\n{}", segment.title, text.trim());
    for table in &segment.tables {
        let markdown = to_markdown(table);
        if !markdown.is_empty() {
            out.push_str("\n\n");
            out.push_str(markdown.trim_end());
        }
    }
    for image in &segment.images {
        out.push_str(&format!(
            "\n[Görsel: sayfa {}, {}x{}",
            image.page, image.width, image.height
        ));
        if let Some(description) = &image.description {
            out.push_str(&format!(", {description}"));
        }
        out.push(']');
    }
    out
}

/// Bind decoded lessons to the chapter's lesson ids.
///
/// Known ids are kept once. Other lessons take the planned id at the same
/// position, then the first planned id still free, then `<chapter>-l-<n>`.
pub fn normalize_lessons(chapter: &Chapter, lessons: Vec<EnhancedLesson>) -> Vec<EnhancedLesson> {
    let known: HashSet<&str> = chapter.lessons.iter().map(|l| l.id.as_str()).collect();
    let mut used: HashSet<String> = HashSet::new();

    lessons
        .into_iter()
        .enumerate()
        .map(|(i, mut lesson)| {
            if !known.contains(lesson.lesson_id.as_str()) || used.contains(&lesson.lesson_id) {
                let planned = chapter
                    .lessons
                    .get(i)
                    .filter(|p| !used.contains(&p.id))
                    .or_else(|| chapter.lessons.iter().find(|p| !used.contains(&p.id)));
                lesson.lesson_id = match planned {
                    Some(p) => p.id.clone(),
                    None => {
                        let mut n = i + 1;
                        loop {
                            let candidate = format!("{}-l-{n}", chapter.id);
                            if !used.contains(&candidate) && !known.contains(candidate.as_str()) {
                                break candidate;
                            }
                            n += 1;
                        }
                    }
                };
            }
            if lesson.title.is_empty() {
                if let Some(planned) = chapter.lessons.iter().find(|l| l.id == lesson.lesson_id) {
                    lesson.title = planned.title.clone();
                }
            }
            used.insert(lesson.lesson_id.clone());
            lesson
        })
        .collect()
}
