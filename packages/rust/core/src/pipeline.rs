//! Master pipeline: PDF → outline → segments → text → structure → visuals → content.
//!
//! Every stage yields a [`StageOutcome`] instead of an error. Failures in
//! the mandatory stages (upload through structure) stop the run and mark the
//! document failed; visual and content failures become warnings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use coursebuilder_planner::{PlanInput, PlannerConfig, ValidationReport, plan, validate};
use coursebuilder_services::{
    DocumentExtractor, Embedder, ImageGenerator, SemanticSearch, SpeechSynthesizer, TextCompletion,
};
use coursebuilder_shared::{
    CourseBuilderError, Document, DocumentStatus, GenerationConfig, Outline, Result, Segment,
};
use coursebuilder_storage::Storage;
use coursebuilder_text::KeywordExtractor;

use crate::completion::StructuredCompletion;
use crate::generator::ContentGenerator;
use crate::outline::extract_outline;
use crate::resolver::{SegmentAssignmentResolver, TitleMatchResolver};
use crate::retry::RetryPolicy;
use crate::structure::generate_structure;
use crate::visuals::generate_visuals;
use crate::worker::{BatchReport, extract_segment_text};

// ---------------------------------------------------------------------------
// Services and configuration
// ---------------------------------------------------------------------------

/// External collaborators, built once at startup.
#[derive(Clone)]
pub struct ServiceSet {
    pub completion: Arc<dyn TextCompletion>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub search: Option<Arc<dyn SemanticSearch>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub keywords: Arc<dyn KeywordExtractor>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub planner: PlannerConfig,
    pub generation: GenerationConfig,
    /// Skip the visual stage entirely.
    pub skip_visuals: bool,
    /// Skip enhanced content generation.
    pub skip_content: bool,
}

/// A source file to ingest.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner: String,
    pub title: String,
    pub file_path: String,
    pub page_count: u32,
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Upload,
    Understanding,
    Segmentation,
    Extraction,
    Structure,
    Visuals,
    EnhancedContent,
}

impl PipelineStage {
    pub const ALL: [Self; 7] = [
        Self::Upload,
        Self::Understanding,
        Self::Segmentation,
        Self::Extraction,
        Self::Structure,
        Self::Visuals,
        Self::EnhancedContent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Understanding => "understanding",
            Self::Segmentation => "segmentation",
            Self::Extraction => "extraction",
            Self::Structure => "structure",
            Self::Visuals => "visuals",
            Self::EnhancedContent => "enhanced_content",
        }
    }

    /// A failed mandatory stage stops the pipeline.
    pub fn is_mandatory(&self) -> bool {
        !matches!(self, Self::Visuals | Self::EnhancedContent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub stage: PipelineStage,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: serde_json::Value,
}

impl StageOutcome {
    fn from_result(stage: PipelineStage, result: Result<serde_json::Value>) -> Self {
        match result {
            Ok(data) => Self {
                stage,
                success: true,
                error: None,
                data,
            },
            Err(e) => Self {
                stage,
                success: false,
                error: Some(e.to_string()),
                data: serde_json::Value::Null,
            },
        }
    }
}

/// Structured result of a pipeline run. Never an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PipelineStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Share of stages finished, 0–100.
    pub progress_percent: u8,
    pub warnings: Vec<String>,
    pub stages: Vec<StageOutcome>,
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a stage.
    fn stage(&self, stage: PipelineStage);
    /// Called after each segment extraction attempt.
    fn segment_extracted(&self, seg_no: u32, current: usize, total: usize);
    /// Called when the pipeline completes, successfully or not.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: PipelineStage) {}
    fn segment_extracted(&self, _seg_no: u32, _current: usize, _total: usize) {}
    fn done(&self, _report: &PipelineReport) {}
}

// ---------------------------------------------------------------------------
// Reusable stage bodies
// ---------------------------------------------------------------------------

/// Plan, validate, and persist the segments of `document`.
///
/// Validation errors reject the plan; warnings are returned with it.
#[instrument(skip_all, fields(document_id = %document.id))]
pub async fn segment_document(
    storage: &Storage,
    document: &Document,
    outline: &Outline,
    config: &PlannerConfig,
) -> Result<(Vec<Segment>, ValidationReport)> {
    let input = PlanInput {
        document_id: &document.id,
        title: &document.title,
        page_count: document.page_count,
    };
    let segments = plan(input, outline, config)?;
    let report = validate(&segments, document.page_count, config);
    if !report.is_valid {
        return Err(CourseBuilderError::validation(format!(
            "segment plan rejected: {}",
            report.errors.join("; ")
        )));
    }
    for warning in &report.warnings {
        warn!(warning = %warning, "segment plan warning");
    }

    storage.replace_segments(&document.id, &segments).await?;
    storage
        .update_document_status(&document.id, DocumentStatus::Segmented)
        .await?;
    info!(segments = segments.len(), "segments stored");
    Ok((segments, report))
}

/// Extract every segment in order, pausing `delay` between items.
/// Continues past failures; fails only when nothing was extracted.
#[instrument(skip_all, fields(document_id = %document.id))]
pub async fn extract_all_segments(
    storage: &Storage,
    extractor: &dyn DocumentExtractor,
    document: &Document,
    delay: Duration,
    progress: &dyn ProgressReporter,
) -> Result<BatchReport> {
    let segments = storage.list_segments(&document.id).await?;
    if segments.is_empty() {
        return Err(CourseBuilderError::validation(format!(
            "document {} has no segments",
            document.id
        )));
    }

    let mut report = BatchReport::default();
    let total = segments.len();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match extract_segment_text(storage, extractor, document, segment).await {
            Ok(_) => report.record_success(&segment.id),
            Err(e) => {
                warn!(seg_no = segment.seg_no, error = %e, "segment extraction failed");
                report.record_failure(&segment.id, e.to_string());
            }
        }
        progress.segment_extracted(segment.seg_no, i + 1, total);
    }

    if report.succeeded == 0 {
        return Err(CourseBuilderError::validation(format!(
            "no segment of {} could be extracted",
            document.id
        )));
    }
    storage
        .update_document_status(&document.id, DocumentStatus::TextExtracted)
        .await?;
    Ok(report)
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Pipeline {
    storage: Arc<Storage>,
    services: ServiceSet,
    config: PipelineConfig,
    resolver: Box<dyn SegmentAssignmentResolver>,
}

impl Pipeline {
    pub fn new(storage: Arc<Storage>, services: ServiceSet, config: PipelineConfig) -> Self {
        Self {
            storage,
            services,
            config,
            resolver: Box::new(TitleMatchResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn SegmentAssignmentResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    fn completion(&self) -> StructuredCompletion {
        StructuredCompletion::new(
            self.storage.clone(),
            self.services.completion.clone(),
            RetryPolicy::from_config(&self.config.generation),
        )
    }

    /// Run every stage for a new upload.
    #[instrument(skip_all, fields(title = %upload.title))]
    pub async fn run(
        &self,
        upload: &UploadRequest,
        progress: &dyn ProgressReporter,
    ) -> PipelineReport {
        let start = Instant::now();
        let mut report = PipelineReport::default();
        let mut document: Option<Document> = None;

        for stage in PipelineStage::ALL {
            progress.stage(stage);
            let result = match stage {
                PipelineStage::Upload => self.upload_stage(upload, &mut document).await,
                _ => {
                    self.document_stage(stage, &mut document, &mut report.warnings, progress)
                        .await
                }
            };
            let outcome = StageOutcome::from_result(stage, result);
            let failed = !outcome.success;
            let message = outcome.error.clone();
            report.stages.push(outcome);

            if let Some(doc) = &document {
                report.document_id = Some(doc.id.clone());
            }

            if failed {
                let message = message.unwrap_or_default();
                if stage.is_mandatory() {
                    error!(stage = stage.as_str(), error = %message, "mandatory stage failed");
                    report.failed_stage = Some(stage);
                    report.error = Some(message);
                    if let Some(doc) = &document {
                        if let Err(e) = self
                            .storage
                            .update_document_status(&doc.id, DocumentStatus::Failed)
                            .await
                        {
                            warn!(error = %e, "could not mark document failed");
                        }
                    }
                    break;
                }
                warn!(stage = stage.as_str(), error = %message, "optional stage failed");
                report.warnings.push(format!("{}: {message}", stage.as_str()));
            }
        }

        let finished = report.stages.iter().filter(|s| s.success).count();
        report.progress_percent = (finished * 100 / PipelineStage::ALL.len()) as u8;
        report.success = report.failed_stage.is_none();
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            success = report.success,
            progress = report.progress_percent,
            warnings = report.warnings.len(),
            "pipeline finished"
        );
        progress.done(&report);
        report
    }

    async fn upload_stage(
        &self,
        upload: &UploadRequest,
        document: &mut Option<Document>,
    ) -> Result<serde_json::Value> {
        let doc = self.upload(upload).await?;
        let data = json!({ "document_id": doc.id, "page_count": doc.page_count });
        *document = Some(doc);
        Ok(data)
    }

    /// Run a stage that reads artifacts written by earlier ones.
    async fn document_stage(
        &self,
        stage: PipelineStage,
        document: &mut Option<Document>,
        warnings: &mut Vec<String>,
        progress: &dyn ProgressReporter,
    ) -> Result<serde_json::Value> {
        let id = document
            .as_ref()
            .map(|d| d.id.clone())
            .ok_or_else(|| CourseBuilderError::validation("no document uploaded"))?;
        let doc = self.storage.require_document(&id).await?;
        let data = match stage {
            PipelineStage::Upload => {
                return Err(CourseBuilderError::validation(format!(
                    "document {} is already uploaded",
                    doc.id
                )));
            }
            PipelineStage::Understanding => {
                let outline = extract_outline(
                    &self.storage,
                    self.services.extractor.as_ref(),
                    &self.completion(),
                    &doc,
                )
                .await?;
                json!({ "title": outline.title, "sections": outline.sections.len() })
            }
            PipelineStage::Segmentation => {
                let outline = doc.outline.clone().unwrap_or_default();
                let (segments, validation) =
                    segment_document(&self.storage, &doc, &outline, &self.config.planner).await?;
                warnings.extend(
                    validation
                        .warnings
                        .iter()
                        .map(|w| format!("segmentation: {w}")),
                );
                json!({ "segments": segments.len(), "warnings": validation.warnings })
            }
            PipelineStage::Extraction => {
                let batch = extract_all_segments(
                    &self.storage,
                    self.services.extractor.as_ref(),
                    &doc,
                    self.config.generation.batch_delay(),
                    progress,
                )
                .await?;
                warnings.extend(
                    batch
                        .items
                        .iter()
                        .filter_map(|i| {
                            i.error
                                .as_ref()
                                .map(|e| format!("extraction {}: {e}", i.id))
                        }),
                );
                json!({
                    "succeeded": batch.succeeded,
                    "failed": batch.failed,
                    "success_rate": batch.success_rate(),
                })
            }
            PipelineStage::Structure => {
                let structure = generate_structure(
                    &self.storage,
                    &self.completion(),
                    self.resolver.as_ref(),
                    &doc,
                )
                .await?;
                json!({ "title": structure.title, "chapters": structure.chapters.len() })
            }
            PipelineStage::Visuals => {
                let images = self.services.images.as_ref();
                let Some(images) = images.filter(|_| !self.config.skip_visuals) else {
                    return Ok(json!({ "skipped": true }));
                };
                let manifest = generate_visuals(
                    &self.storage,
                    images.as_ref(),
                    &doc,
                    self.config.generation.batch_delay(),
                )
                .await?;
                if manifest.succeeded == 0 && manifest.failed > 0 {
                    return Err(CourseBuilderError::service(
                        "images",
                        "no image could be generated",
                    ));
                }
                json!({
                    "succeeded": manifest.succeeded,
                    "failed": manifest.failed,
                    "success_rate": manifest.success_rate(),
                })
            }
            PipelineStage::EnhancedContent => {
                if self.config.skip_content {
                    return Ok(json!({ "skipped": true }));
                }
                let generator = ContentGenerator::new(
                    self.storage.clone(),
                    &self.services,
                    &self.config.generation,
                );
                let generated = generator.generate_document(&doc.id).await?;
                warnings.extend(generated.warnings.iter().cloned());
                warnings.extend(
                    generated
                        .failed_chapters
                        .iter()
                        .map(|f| format!("enhanced_content {}: {}", f.chapter_id, f.error)),
                );
                json!({
                    "chapters": generated.content.chapters.len(),
                    "failed_chapters": generated.failed_chapters.len(),
                    "quality": generated.content.quality.as_ref().map(|q| q.overall_score),
                })
            }
        };
        *document = Some(doc);
        Ok(data)
    }

    async fn upload(&self, upload: &UploadRequest) -> Result<Document> {
        if upload.file_path.trim().is_empty() {
            return Err(CourseBuilderError::validation("no source file selected"));
        }
        if upload.page_count == 0 {
            return Err(CourseBuilderError::validation(format!(
                "{} has no pages",
                upload.file_path
            )));
        }
        let doc = Document::new(&upload.owner, &upload.title, &upload.file_path, upload.page_count);
        self.storage.insert_document(&doc).await?;
        info!(document_id = %doc.id, pages = doc.page_count, "document uploaded");
        Ok(doc)
    }
}
