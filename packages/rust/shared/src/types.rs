//! Core domain types for CourseBuilder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Generate a new time-sortable record identifier (UUID v7).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Deserialize `null` or a missing value as `T::default()`.
///
/// AI output frequently emits `null` for empty lists; consumers never see it.
pub fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Lifecycle of an uploaded document. Advanced only by pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    OutlineExtracted,
    Segmented,
    TextExtracted,
    CourseStructureGenerated,
    VisualsGenerated,
    EnhancedContentGenerated,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::OutlineExtracted => "outline_extracted",
            Self::Segmented => "segmented",
            Self::TextExtracted => "text_extracted",
            Self::CourseStructureGenerated => "course_structure_generated",
            Self::VisualsGenerated => "visuals_generated",
            Self::EnhancedContentGenerated => "enhanced_content_generated",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "UPLOADED" => Self::Uploaded,
            "outline_extracted" => Self::OutlineExtracted,
            "segmented" => Self::Segmented,
            "text_extracted" => Self::TextExtracted,
            "course_structure_generated" => Self::CourseStructureGenerated,
            "visuals_generated" => Self::VisualsGenerated,
            "enhanced_content_generated" => Self::EnhancedContentGenerated,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// A user-submitted source file and the artifacts attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner: String,
    pub title: String,
    /// Location of the source PDF on disk.
    pub file_path: String,
    pub page_count: u32,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<Outline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_structure: Option<CourseStructure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_content: Option<EnhancedContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<ImageManifest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline_extracted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_content_generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_generated_at: Option<DateTime<Utc>>,
}

impl Document {
    /// A freshly uploaded document with no artifacts.
    pub fn new(owner: &str, title: &str, file_path: &str, page_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner: owner.to_string(),
            title: title.to_string(),
            file_path: file_path.to_string(),
            page_count,
            status: DocumentStatus::Uploaded,
            outline: None,
            course_structure: None,
            enhanced_content: None,
            images: None,
            created_at: now,
            updated_at: now,
            outline_extracted_at: None,
            structure_generated_at: None,
            enhanced_content_generated_at: None,
            images_generated_at: None,
        }
    }
}

/// Document outline produced by the understanding stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub headings: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub sections: Vec<OutlineSection>,
}

/// One outline section with an inclusive page range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub title: String,
    pub start_page: u32,
    pub end_page: u32,
    #[serde(default = "default_content_type", deserialize_with = "nullable_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "text".into()
}

fn nullable_content_type<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_content_type))
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// Processing status shared by segment flags and queued tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => Self::Pending,
            "PROCESSING" => Self::Processing,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A raster image found in a page range. Binary data is never kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub page: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A table detected in a page range. May be empty or ragged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub page: u32,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

/// A contiguous page range of a document representing one teachable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub document_id: String,
    /// 1-based, contiguous within a document.
    pub seg_no: u32,
    pub title: String,
    /// Inclusive start page.
    pub p_start: u32,
    /// Inclusive end page.
    pub p_end: u32,
    pub content_type: String,
    /// Titles of the outline sections this segment came from.
    #[serde(default)]
    pub source_sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub images: Vec<ExtractedImage>,
    #[serde(default)]
    pub tables: Vec<ExtractedTable>,
    pub text_status: ProcessingStatus,
    pub img_status: ProcessingStatus,
}

impl Segment {
    /// A planned segment that has not been extracted yet.
    pub fn planned(
        document_id: &str,
        title: impl Into<String>,
        p_start: u32,
        p_end: u32,
        content_type: impl Into<String>,
        source_sections: Vec<String>,
    ) -> Self {
        Self {
            id: new_id(),
            document_id: document_id.to_string(),
            seg_no: 0,
            title: title.into(),
            p_start,
            p_end,
            content_type: content_type.into(),
            source_sections,
            text: None,
            images: Vec::new(),
            tables: Vec::new(),
            text_status: ProcessingStatus::Pending,
            img_status: ProcessingStatus::Pending,
        }
    }

    /// Number of pages covered (inclusive range).
    pub fn page_count(&self) -> u32 {
        self.p_end.saturating_sub(self.p_start) + 1
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Kind of work bound to a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    TextWorker,
    ImageWorker,
    ContentWorker,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextWorker => "TEXT_WORKER",
            Self::ImageWorker => "IMAGE_WORKER",
            Self::ContentWorker => "CONTENT_WORKER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "TEXT_WORKER" => Self::TextWorker,
            "IMAGE_WORKER" => Self::ImageWorker,
            "CONTENT_WORKER" => Self::ContentWorker,
            _ => return None,
        })
    }
}

/// A unit of queued work for one (document, segment, task type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub document_id: String,
    pub segment_id: String,
    pub task_type: TaskType,
    /// Higher is more urgent.
    pub priority: i64,
    pub status: ProcessingStatus,
    /// Set only while leased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Structured failure context (attempt counts, upstream status, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// A new PENDING task.
    pub fn pending(
        document_id: &str,
        segment_id: &str,
        task_type: TaskType,
        priority: i64,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: new_id(),
            document_id: document_id.to_string(),
            segment_id: segment_id.to_string(),
            task_type,
            priority,
            status: ProcessingStatus::Pending,
            worker_id: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            error_details: None,
            metadata,
            result: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Course structure
// ---------------------------------------------------------------------------

/// Chapter/lesson skeleton generated once per document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseStructure {
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub chapters: Vec<Chapter>,
}

impl CourseStructure {
    /// Position of a chapter by id.
    pub fn chapter_index(&self, chapter_id: &str) -> Option<usize> {
        self.chapters.iter().position(|c| c.id == chapter_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub segment_ids: Vec<String>,
    #[serde(default = "default_content_type", deserialize_with = "nullable_content_type")]
    pub content_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub learning_points: Vec<String>,
}

// ---------------------------------------------------------------------------
// Enhanced content
// ---------------------------------------------------------------------------

/// Generated course content for a whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedContent {
    pub chapters: Vec<ChapterContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

/// Generated payload for one chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub chapter_id: String,
    pub chapter_title: String,
    pub lessons: Vec<EnhancedLesson>,
    #[serde(default)]
    pub metadata: ChapterMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterMetadata {
    pub segment_count: usize,
    pub context_length: usize,
    pub context_components: Vec<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

/// One lesson of generated content. Every field is always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedLesson {
    #[serde(default, deserialize_with = "nullable")]
    pub lesson_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub explanatory_text: String,
    #[serde(default, deserialize_with = "nullable")]
    pub key_points: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub tables: Vec<ContentTable>,
    #[serde(default, deserialize_with = "nullable")]
    pub code_examples: Vec<CodeExample>,
    #[serde(default, deserialize_with = "nullable")]
    pub practical_examples: Vec<PracticalExample>,
    #[serde(default, deserialize_with = "nullable")]
    pub cross_references: Vec<CrossReference>,
    #[serde(default, deserialize_with = "nullable")]
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentTable {
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub headers: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeExample {
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub language: String,
    #[serde(default, deserialize_with = "nullable")]
    pub code: String,
    #[serde(default, deserialize_with = "nullable")]
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "PracticalExampleRepr")]
pub struct PracticalExample {
    pub title: String,
    pub description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PracticalExampleRepr {
    Text(String),
    Full {
        #[serde(default, deserialize_with = "nullable")]
        title: String,
        #[serde(default, alias = "scenario", deserialize_with = "nullable")]
        description: String,
    },
}

impl From<PracticalExampleRepr> for PracticalExample {
    fn from(repr: PracticalExampleRepr) -> Self {
        match repr {
            PracticalExampleRepr::Text(description) => Self {
                title: String::new(),
                description,
            },
            PracticalExampleRepr::Full { title, description } => Self { title, description },
        }
    }
}

/// Pointer to related material in another chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "CrossReferenceRepr")]
pub struct CrossReference {
    pub target: String,
    pub description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CrossReferenceRepr {
    Text(String),
    Full {
        #[serde(default, alias = "chapter", deserialize_with = "nullable")]
        target: String,
        #[serde(default, deserialize_with = "nullable")]
        description: String,
    },
}

impl From<CrossReferenceRepr> for CrossReference {
    fn from(repr: CrossReferenceRepr) -> Self {
        match repr {
            CrossReferenceRepr::Text(description) => Self {
                target: String::new(),
                description,
            },
            CrossReferenceRepr::Full {
                target,
                description,
            } => Self {
                target,
                description,
            },
        }
    }
}

/// Advisory content-quality scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Mean of chapter scores, 0–100.
    pub overall_score: f64,
    pub chapters: Vec<ChapterQuality>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterQuality {
    pub chapter_id: String,
    pub score: u32,
    pub issues: Vec<String>,
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Per-lesson illustration results for a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub items: Vec<ImageItem>,
    pub succeeded: usize,
    pub failed: usize,
}

impl ImageManifest {
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            0.0
        } else {
            self.succeeded as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    pub chapter_id: String,
    pub lesson_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_time_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Knowledge base
// ---------------------------------------------------------------------------

/// A keyword-derived knowledge-base entity. Not deduplicated by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub name: String,
    pub description: String,
    /// 0–1.
    pub relevance_score: f64,
    pub document_id: String,
    pub chapter_id: String,
    pub lesson_id: String,
    pub created_at: DateTime<Utc>,
}

/// Undirected, scored association between two concept names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRelationship {
    pub id: String,
    pub concept_a: String,
    pub concept_b: String,
    /// 0–1.
    pub score: f64,
    pub document_id: String,
    pub chapter_id: String,
    pub created_at: DateTime<Utc>,
}
