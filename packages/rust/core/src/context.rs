//! RAG context assembly for chapter generation.
//!
//! Four independently computed components, in priority order:
//!
//! 1. cross-chapter summary of up to three preceding chapters
//! 2. related concepts from the knowledge base
//! 3. semantic search hits from stored lesson texts
//! 4. course consistency rules
//!
//! Components are concatenated in that order under a character budget.
//! When they do not all fit, whole components are taken greedily and the
//! first one that overflows is cut at a sentence boundary, so lower
//! priorities are always sacrificed first.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use coursebuilder_services::{SearchOptions, SemanticSearch};
use coursebuilder_shared::{Chapter, CourseBuilderError, CourseStructure, Result};
use coursebuilder_storage::Storage;
use coursebuilder_text::{
    KeywordExtractor, char_len, fold_case, prefix_chars, preview, truncate_at_sentence,
};

use crate::search::sort_by_similarity;

pub const DEFAULT_CONTEXT_BUDGET: usize = 5000;

const SEPARATOR: &str = "\n\n";
const PRIOR_CHAPTERS: usize = 3;
const CHAPTER_KEYWORDS: usize = 5;
const CONCEPT_KEYWORDS: usize = 8;
const CONCEPT_LIMIT: usize = 7;
const SEARCH_LIMIT: usize = 5;
const SEARCH_THRESHOLD: f32 = 0.5;
const SEARCH_PREVIEW_CHARS: usize = 200;
const EXCERPT_CHARS: usize = 150;
const IMPORTANCE_KEYWORDS: &[&str] = &["temel", "ana", "core", "fundamental"];

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    CrossChapter,
    RelatedConcepts,
    SemanticSearch,
    ConsistencyRules,
}

impl ComponentKind {
    /// Lower is more important.
    pub fn priority(self) -> u8 {
        match self {
            Self::CrossChapter => 1,
            Self::RelatedConcepts => 2,
            Self::SemanticSearch => 3,
            Self::ConsistencyRules => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::CrossChapter => "cross_chapter",
            Self::RelatedConcepts => "related_concepts",
            Self::SemanticSearch => "semantic_search",
            Self::ConsistencyRules => "consistency_rules",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextComponent {
    pub kind: ComponentKind,
    pub text: String,
}

impl ContextComponent {
    pub fn new(kind: ComponentKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Assembled context handed to the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuiltContext {
    pub context: String,
    /// Length of `context` in characters.
    pub length: usize,
    /// Labels of the components that made it in, in order.
    pub components: Vec<String>,
    pub truncated: bool,
}

/// Concatenate components by priority within `budget` characters.
pub fn assemble(mut components: Vec<ContextComponent>, budget: usize) -> BuiltContext {
    components.retain(|c| !c.text.trim().is_empty());
    components.sort_by_key(|c| c.kind.priority());

    let sep_len = char_len(SEPARATOR);
    let mut out = BuiltContext::default();
    let mut used = 0usize;

    for component in components {
        let sep = if out.context.is_empty() { 0 } else { sep_len };
        let len = char_len(&component.text);

        if used + sep + len <= budget {
            if sep > 0 {
                out.context.push_str(SEPARATOR);
            }
            out.context.push_str(&component.text);
            out.components.push(component.kind.label().to_string());
            used += sep + len;
            continue;
        }

        out.truncated = true;
        let remaining = budget.saturating_sub(used + sep);
        let cut = truncate_at_sentence(&component.text, remaining);
        if !cut.is_empty() {
            if sep > 0 {
                out.context.push_str(SEPARATOR);
            }
            out.context.push_str(&cut);
            out.components.push(component.kind.label().to_string());
            used += sep + char_len(&cut);
        }
        break;
    }

    out.length = used;
    out
}

/// Importance of a chapter on a 1–10 scale, from its size and title.
pub fn importance_score(chapter: &Chapter) -> u8 {
    let mut score: i32 = 5;
    let lessons = chapter.lessons.len();
    if lessons > 5 {
        score += 2;
    }
    if lessons > 3 {
        score += 1;
    }
    if char_len(&chapter.title) > 30 {
        score += 1;
    }
    let title = fold_case(&chapter.title);
    if IMPORTANCE_KEYWORDS.iter().any(|kw| title.contains(kw)) {
        score += 1;
    }
    score.clamp(1, 10) as u8
}

/// Summary of up to three chapters before `index`.
pub fn cross_chapter_component(
    structure: &CourseStructure,
    index: usize,
    keywords: &dyn KeywordExtractor,
) -> Option<String> {
    if index == 0 {
        return None;
    }
    let start = index.saturating_sub(PRIOR_CHAPTERS);
    let prior = structure.chapters.get(start..index)?;

    let mut text = String::from("## Önceki Bölümler");
    for chapter in prior {
        let titles: Vec<&str> = chapter.lessons.iter().map(|l| l.title.as_str()).collect();
        let top = keywords.extract(&titles.join(" "), CHAPTER_KEYWORDS);
        text.push_str(&format!(
            "\n- {} (önem: {}/10)",
            chapter.title,
            importance_score(chapter)
        ));
        if !top.is_empty() {
            text.push_str(&format!(" | anahtar kavramlar: {}", top.join(", ")));
        }
    }
    Some(text)
}

/// Position of the chapter and the rules every chapter follows.
pub fn consistency_rules_component(index: usize, total: usize) -> String {
    let position = match (index == 0, index + 1 == total) {
        (true, true) => "tek bölüm",
        (true, false) => "ilk bölüm",
        (false, true) => "son bölüm",
        (false, false) => "ara bölüm",
    };
    format!(
        "## Tutarlılık Kuralları\n\
         - Bu bölüm kursun {}/{} bölümüdür ({position}).\n\
         - Önceki bölümlerde tanımlanan terimleri aynen kullan.\n\
         - Daha önce açıklanan kavramları yeniden tanımlama; gerekirse önceki bölüme atıf yap.\n\
         - Kod ve örnek biçimini tüm bölümlerde aynı tut.",
        index + 1,
        total
    )
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct ContextBuilder {
    storage: Arc<Storage>,
    search: Option<Arc<dyn SemanticSearch>>,
    keywords: Arc<dyn KeywordExtractor>,
    budget: usize,
}

impl ContextBuilder {
    pub fn new(
        storage: Arc<Storage>,
        search: Option<Arc<dyn SemanticSearch>>,
        keywords: Arc<dyn KeywordExtractor>,
        budget: usize,
    ) -> Self {
        Self {
            storage,
            search,
            keywords,
            budget,
        }
    }

    /// Build the bounded context for `chapter`.
    ///
    /// Component failures are logged and the component is left out.
    #[instrument(skip_all, fields(document_id = %document_id, chapter = %chapter.id))]
    pub async fn build_context(
        &self,
        document_id: &str,
        chapter: &Chapter,
        structure: &CourseStructure,
        segment_text: &str,
    ) -> Result<BuiltContext> {
        let index = structure.chapter_index(&chapter.id).ok_or_else(|| {
            CourseBuilderError::validation(format!(
                "chapter {} is not part of the course structure",
                chapter.id
            ))
        })?;

        let segment_keywords = self.keywords.extract(segment_text, CONCEPT_KEYWORDS);
        let mut components = Vec::with_capacity(4);

        if let Some(text) = cross_chapter_component(structure, index, self.keywords.as_ref()) {
            components.push(ContextComponent::new(ComponentKind::CrossChapter, text));
        }

        match self.related_concepts(&segment_keywords).await {
            Ok(Some(text)) => {
                components.push(ContextComponent::new(ComponentKind::RelatedConcepts, text));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "related concepts unavailable"),
        }

        match self
            .semantic_matches(document_id, &segment_keywords, segment_text)
            .await
        {
            Ok(Some(text)) => {
                components.push(ContextComponent::new(ComponentKind::SemanticSearch, text));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "semantic search unavailable"),
        }

        components.push(ContextComponent::new(
            ComponentKind::ConsistencyRules,
            consistency_rules_component(index, structure.chapters.len()),
        ));

        let built = assemble(components, self.budget);
        debug!(
            length = built.length,
            components = ?built.components,
            truncated = built.truncated,
            "built context"
        );
        Ok(built)
    }

    async fn related_concepts(&self, keywords: &[String]) -> Result<Option<String>> {
        if keywords.is_empty() {
            return Ok(None);
        }
        let mut concepts = self.storage.find_concepts(keywords, CONCEPT_LIMIT).await?;
        if concepts.is_empty() {
            return Ok(None);
        }
        concepts.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        concepts.truncate(CONCEPT_LIMIT);

        let mut text = String::from("## İlgili Kavramlar");
        for concept in &concepts {
            text.push_str(&format!(
                "\n- {}: {} ({}% uyum)",
                concept.name,
                concept.description,
                (concept.relevance_score * 100.0).round() as i64
            ));
        }
        Ok(Some(text))
    }

    async fn semantic_matches(
        &self,
        document_id: &str,
        keywords: &[String],
        segment_text: &str,
    ) -> Result<Option<String>> {
        let Some(search) = &self.search else {
            return Ok(None);
        };

        let query = format!(
            "{} {}",
            keywords.join(" "),
            preview(segment_text, SEARCH_PREVIEW_CHARS)
        );
        let options = SearchOptions {
            limit: SEARCH_LIMIT,
            threshold: SEARCH_THRESHOLD,
            document_id: Some(document_id.to_string()),
        };
        let mut hits = search.search(query.trim(), &options).await?;
        hits.retain(|h| h.similarity >= SEARCH_THRESHOLD);
        if hits.is_empty() {
            return Ok(None);
        }
        sort_by_similarity(&mut hits);
        hits.truncate(SEARCH_LIMIT);

        let mut text = String::from("## Benzer İçerikler");
        for hit in &hits {
            text.push_str(&format!(
                "\n- {}: {}... ({}% benzerlik)",
                hit.source,
                prefix_chars(hit.content.trim(), EXCERPT_CHARS).trim_end(),
                (hit.similarity * 100.0).round() as i64
            ));
        }
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSearch, sample_structure, temp_storage};
    use chrono::Utc;
    use coursebuilder_services::SearchHit;
    use coursebuilder_shared::{Concept, Lesson, new_id};
    use coursebuilder_text::FrequencyKeywordExtractor;

    fn chapter(title: &str, lessons: usize) -> Chapter {
        Chapter {
            id: new_id(),
            title: title.into(),
            description: String::new(),
            lessons: (0..lessons)
                .map(|i| Lesson {
                    id: format!("l-{i}"),
                    title: format!("Ders {i}"),
                    ..Lesson::default()
                })
                .collect(),
        }
    }

    #[test]
    fn importance_scoring() {
        assert_eq!(importance_score(&chapter("Giriş", 1)), 5);
        assert_eq!(importance_score(&chapter("Giriş", 4)), 6);
        assert_eq!(importance_score(&chapter("Giriş", 6)), 8);
        assert_eq!(
            importance_score(&chapter("Temel Kavramlar ve Programlamanın Esasları", 6)),
            10
        );
    }

    #[test]
    fn everything_fits_in_priority_order() {
        let built = assemble(
            vec![
                ContextComponent::new(ComponentKind::ConsistencyRules, "kurallar"),
                ContextComponent::new(ComponentKind::CrossChapter, "önceki"),
            ],
            100,
        );
        assert_eq!(built.context, "önceki\n\nkurallar");
        assert_eq!(built.length, char_len(&built.context));
        assert_eq!(built.components, vec!["cross_chapter", "consistency_rules"]);
        assert!(!built.truncated);
    }

    #[test]
    fn overflow_truncates_lowest_priority_first() {
        let cross = format!("{}.", "a".repeat(3000));
        let concepts = format!("{}. {}.", "b".repeat(1500), "c".repeat(1500));
        let rules = "kurallar".repeat(100);
        let built = assemble(
            vec![
                ContextComponent::new(ComponentKind::ConsistencyRules, rules),
                ContextComponent::new(ComponentKind::RelatedConcepts, concepts),
                ContextComponent::new(ComponentKind::CrossChapter, cross.clone()),
            ],
            5000,
        );

        assert!(built.truncated);
        assert!(built.length <= 5000);
        assert_eq!(built.length, char_len(&built.context));
        assert!(built.context.starts_with(&cross));
        assert!(built.context.ends_with("..."));
        assert_eq!(built.components, vec!["cross_chapter", "related_concepts"]);
        assert!(!built.context.contains("kurallar"));
    }

    #[test]
    fn oversized_first_component_is_cut_to_budget() {
        let built = assemble(
            vec![ContextComponent::new(
                ComponentKind::CrossChapter,
                "Uzun cümle. ".repeat(1000),
            )],
            5000,
        );
        assert!(built.length <= 5000);
        assert!(built.truncated);
    }

    #[test]
    fn context_never_exceeds_budget() {
        for budget in [0usize, 1, 3, 10, 57, 400] {
            let built = assemble(
                vec![
                    ContextComponent::new(ComponentKind::CrossChapter, "x".repeat(50)),
                    ContextComponent::new(ComponentKind::SemanticSearch, "y. ".repeat(50)),
                ],
                budget,
            );
            assert!(built.length <= budget, "budget {budget}");
            assert_eq!(char_len(&built.context), built.length);
        }
    }

    #[test]
    fn first_chapter_has_no_cross_chapter_summary() {
        let structure = sample_structure(&[]);
        let extractor = FrequencyKeywordExtractor::default();
        assert!(cross_chapter_component(&structure, 0, &extractor).is_none());
        let text = cross_chapter_component(&structure, 1, &extractor).unwrap();
        assert!(text.contains(&structure.chapters[0].title));
        assert!(text.contains("önem:"));
    }

    #[test]
    fn consistency_rules_name_position() {
        assert!(consistency_rules_component(0, 3).contains("1/3 bölümüdür (ilk bölüm)"));
        assert!(consistency_rules_component(1, 3).contains("(ara bölüm)"));
        assert!(consistency_rules_component(2, 3).contains("(son bölüm)"));
        assert!(consistency_rules_component(0, 1).contains("(tek bölüm)"));
    }

    #[tokio::test]
    async fn builds_all_components() {
        let storage = temp_storage().await;
        storage
            .insert_concept(&Concept {
                id: new_id(),
                name: "değişken".into(),
                description: "Değer saklayan isimli alan.".into(),
                relevance_score: 0.42,
                document_id: "doc-1".into(),
                chapter_id: "ch-1".into(),
                lesson_id: "ch-1-l-1".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let search = FakeSearch::with_hits(vec![
            SearchHit {
                content: "Döngüler tekrar eden işleri yapar.".into(),
                similarity: 0.91,
                source: "Döngüler".into(),
                metadata: serde_json::Value::Null,
            },
            SearchHit {
                content: "Alakasız".into(),
                similarity: 0.2,
                source: "Başka".into(),
                metadata: serde_json::Value::Null,
            },
        ]);
        let builder = ContextBuilder::new(
            storage,
            Some(Arc::new(search)),
            Arc::new(FrequencyKeywordExtractor::default()),
            DEFAULT_CONTEXT_BUDGET,
        );

        let structure = sample_structure(&[]);
        let chapter = &structure.chapters[1];
        let built = builder
            .build_context(
                "doc-1",
                chapter,
                &structure,
                "Değişken tanımı: değişken bir değeri saklar. Değişken türleri.",
            )
            .await
            .unwrap();

        assert_eq!(
            built.components,
            vec![
                "cross_chapter",
                "related_concepts",
                "semantic_search",
                "consistency_rules"
            ]
        );
        assert!(built.context.contains("değişken: Değer saklayan isimli alan. (42% uyum)"));
        assert!(built.context.contains("Döngüler: Döngüler tekrar eden işleri yapar.... (91% benzerlik)"));
        assert!(!built.context.contains("Alakasız"));
        assert!(built.length <= DEFAULT_CONTEXT_BUDGET);
    }

    #[tokio::test]
    async fn unknown_chapter_is_rejected() {
        let storage = temp_storage().await;
        let builder = ContextBuilder::new(
            storage,
            None,
            Arc::new(FrequencyKeywordExtractor::default()),
            DEFAULT_CONTEXT_BUDGET,
        );
        let structure = sample_structure(&[]);
        let stray = chapter("Başka", 1);
        let err = builder
            .build_context("doc-1", &stray, &structure, "metin")
            .await
            .unwrap_err();
        assert!(matches!(err, CourseBuilderError::Validation { .. }));
    }
}
