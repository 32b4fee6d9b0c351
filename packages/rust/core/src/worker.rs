//! Worker loop and segment extraction handlers.
//!
//! A worker repeatedly claims a task, runs the handler for its type, and
//! records the outcome. Handler failures become FAILED tasks and never stop
//! the loop; the [`BatchReport`] collects per-item results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use coursebuilder_services::DocumentExtractor;
use coursebuilder_shared::{
    CourseBuilderError, Document, ProcessingStatus, Result, Segment, Task, TaskType,
};
use coursebuilder_storage::Storage;

use crate::queue::{TaskQueue, WorkerId};

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Work bound to one [`TaskType`].
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Run the task. The returned value is stored as the task result.
    async fn handle(&self, task: &Task) -> Result<serde_json::Value>;
}

/// TEXT_WORKER: extracts text and tables for the task's segment.
pub struct TextExtractionHandler {
    storage: Arc<Storage>,
    extractor: Arc<dyn DocumentExtractor>,
}

impl TextExtractionHandler {
    pub fn new(storage: Arc<Storage>, extractor: Arc<dyn DocumentExtractor>) -> Self {
        Self { storage, extractor }
    }
}

#[async_trait]
impl TaskHandler for TextExtractionHandler {
    fn task_type(&self) -> TaskType {
        TaskType::TextWorker
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value> {
        let (document, segment) = load_task_target(&self.storage, task).await?;
        let text = extract_segment_text(&self.storage, self.extractor.as_ref(), &document, &segment)
            .await?;
        Ok(json!({
            "seg_no": segment.seg_no,
            "chars": text.chars().count(),
        }))
    }
}

/// IMAGE_WORKER: extracts image descriptors for the task's segment.
pub struct ImageExtractionHandler {
    storage: Arc<Storage>,
    extractor: Arc<dyn DocumentExtractor>,
}

impl ImageExtractionHandler {
    pub fn new(storage: Arc<Storage>, extractor: Arc<dyn DocumentExtractor>) -> Self {
        Self { storage, extractor }
    }
}

#[async_trait]
impl TaskHandler for ImageExtractionHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ImageWorker
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value> {
        let (document, segment) = load_task_target(&self.storage, task).await?;
        self.storage
            .set_segment_img_status(&segment.id, ProcessingStatus::Processing)
            .await?;

        match self
            .extractor
            .extract(&document, segment.p_start, segment.p_end)
            .await
        {
            Ok(range) => {
                self.storage
                    .set_segment_images(&segment.id, &range.images)
                    .await?;
                Ok(json!({ "seg_no": segment.seg_no, "images": range.images.len() }))
            }
            Err(e) => {
                self.storage
                    .set_segment_img_status(&segment.id, ProcessingStatus::Failed)
                    .await?;
                Err(e)
            }
        }
    }
}

async fn load_task_target(storage: &Storage, task: &Task) -> Result<(Document, Segment)> {
    let document = storage.require_document(&task.document_id).await?;
    let segment = storage
        .get_segment(&task.segment_id)
        .await?
        .ok_or_else(|| CourseBuilderError::not_found("segment", &task.segment_id))?;
    Ok((document, segment))
}

/// Extract one segment's text and tables and persist them, tracking
/// `text_status` through PROCESSING to COMPLETED or FAILED.
pub async fn extract_segment_text(
    storage: &Storage,
    extractor: &dyn DocumentExtractor,
    document: &Document,
    segment: &Segment,
) -> Result<String> {
    storage
        .set_segment_text_status(&segment.id, ProcessingStatus::Processing)
        .await?;

    match extractor
        .extract(document, segment.p_start, segment.p_end)
        .await
    {
        Ok(range) => {
            storage
                .set_segment_text(&segment.id, &range.text, &range.tables)
                .await?;
            if !range.images.is_empty() {
                storage.set_segment_images(&segment.id, &range.images).await?;
            }
            Ok(range.text)
        }
        Err(e) => {
            storage
                .set_segment_text_status(&segment.id, ProcessingStatus::Failed)
                .await?;
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Batch results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    /// Task id, or segment id for direct batch runs.
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item results of a batch that continues past failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub items: Vec<ItemOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn record_success(&mut self, id: impl Into<String>) {
        self.items.push(ItemOutcome {
            id: id.into(),
            success: true,
            error: None,
        });
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, id: impl Into<String>, error: impl Into<String>) {
        self.items.push(ItemOutcome {
            id: id.into(),
            success: false,
            error: Some(error.into()),
        });
        self.failed += 1;
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Share of successful items in `[0, 1]`; 0 for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total() as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Pending tasks fetched per poll.
    pub poll_limit: u32,
    /// Pause between items, for external rate limits.
    pub delay: Duration,
    /// Stop after this many tasks.
    pub max_tasks: Option<usize>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_limit: 10,
            delay: Duration::from_millis(1500),
            max_tasks: None,
        }
    }
}

/// Drain the queue for the task types `handlers` cover.
#[instrument(skip_all, fields(worker_id = %worker))]
pub async fn run_worker(
    queue: &TaskQueue,
    worker: &WorkerId,
    handlers: &[&dyn TaskHandler],
    options: &WorkerOptions,
) -> Result<BatchReport> {
    let task_types: Vec<TaskType> = handlers.iter().map(|h| h.task_type()).collect();
    if task_types.is_empty() {
        return Err(CourseBuilderError::validation("worker has no task handlers"));
    }

    let mut report = BatchReport::default();
    while options.max_tasks.is_none_or(|max| report.total() < max) {
        if report.total() > 0 && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }

        let Some(task) = queue
            .claim_next(worker, &task_types, options.poll_limit)
            .await?
        else {
            break;
        };

        let outcome = match handlers.iter().find(|h| h.task_type() == task.task_type) {
            None => Err(CourseBuilderError::validation("no handler for task type")),
            Some(handler) => handler.handle(&task).await,
        };

        // A lost lease only fails this item; the batch keeps going.
        match outcome {
            Ok(result) => match queue.complete_task(&task.id, worker, Some(result)).await {
                Ok(()) => {
                    info!(task_id = %task.id, task_type = task.task_type.as_str(), "task completed");
                    report.record_success(&task.id);
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "could not complete task");
                    report.record_failure(&task.id, e.to_string());
                }
            },
            Err(e) => {
                let message = e.to_string();
                warn!(task_id = %task.id, error = %message, "task failed");
                let details = json!({ "retryable": e.is_retryable() });
                if let Err(transition) = queue
                    .fail_task(&task.id, worker, &message, Some(details))
                    .await
                {
                    warn!(task_id = %task.id, error = %transition, "could not record task failure");
                }
                report.record_failure(&task.id, message);
            }
        }
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        "worker finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeExtractor, seeded_segments, temp_storage};

    fn options() -> WorkerOptions {
        WorkerOptions {
            poll_limit: 10,
            delay: Duration::ZERO,
            max_tasks: None,
        }
    }

    #[tokio::test]
    async fn worker_processes_all_segments_and_records_failures() {
        let storage = temp_storage().await;
        let (doc, segments) = seeded_segments(&storage, &[(1, 10), (11, 20), (21, 30)]).await;
        let extractor = Arc::new(FakeExtractor::failing_from_page(21));
        let queue = TaskQueue::new(storage.clone());
        queue
            .create_tasks_for_document(&doc.id, TaskType::TextWorker)
            .await
            .unwrap();

        let handler = TextExtractionHandler::new(storage.clone(), extractor);
        let worker = WorkerId::generate();
        let report = run_worker(&queue, &worker, &[&handler], &options())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!((report.success_rate() - 2.0 / 3.0).abs() < 1e-9);

        let first = storage.get_segment(&segments[0].id).await.unwrap().unwrap();
        assert_eq!(first.text_status, ProcessingStatus::Completed);
        assert!(first.text.unwrap().contains("--- Sayfa 1 ---"));

        let last = storage.get_segment(&segments[2].id).await.unwrap().unwrap();
        assert_eq!(last.text_status, ProcessingStatus::Failed);

        let failed = storage
            .list_tasks(Some(&doc.id), Some(ProcessingStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error_message.is_some());
    }

    /// Loses its lease to another worker while running.
    struct LeaseLosingHandler {
        storage: Arc<Storage>,
    }

    #[async_trait]
    impl TaskHandler for LeaseLosingHandler {
        fn task_type(&self) -> TaskType {
            TaskType::TextWorker
        }

        async fn handle(&self, task: &Task) -> Result<serde_json::Value> {
            let cutoff = chrono::Utc::now() + chrono::Duration::seconds(5);
            self.storage.sweep_stale_leases(cutoff).await?;
            self.storage.lock_task(&task.id, "worker-other").await?;
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn lost_lease_is_an_item_failure() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10)]).await;
        let queue = TaskQueue::new(storage.clone());
        let created = queue
            .create_tasks_for_document(&doc.id, TaskType::TextWorker)
            .await
            .unwrap();

        let handler = LeaseLosingHandler {
            storage: storage.clone(),
        };
        let report = run_worker(&queue, &WorkerId::generate(), &[&handler], &options())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 1);
        let task = storage.get_task(&created[0].id).await.unwrap().unwrap();
        assert_eq!(task.status, ProcessingStatus::Processing);
        assert_eq!(task.worker_id.as_deref(), Some("worker-other"));
    }

    #[tokio::test]
    async fn worker_honours_max_tasks() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10), (11, 20)]).await;
        let queue = TaskQueue::new(storage.clone());
        queue
            .create_tasks_for_document(&doc.id, TaskType::ImageWorker)
            .await
            .unwrap();

        let handler = ImageExtractionHandler::new(storage.clone(), Arc::new(FakeExtractor::default()));
        let mut opts = options();
        opts.max_tasks = Some(1);
        let report = run_worker(&queue, &WorkerId::generate(), &[&handler], &opts)
            .await
            .unwrap();

        assert_eq!(report.total(), 1);
        assert_eq!(queue.get_pending_tasks(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn worker_without_handlers_is_rejected() {
        let storage = temp_storage().await;
        let queue = TaskQueue::new(storage);
        let err = run_worker(&queue, &WorkerId::generate(), &[], &options())
            .await
            .unwrap_err();
        assert!(matches!(err, CourseBuilderError::Validation { .. }));
    }

    #[test]
    fn empty_batch_has_zero_success_rate() {
        assert_eq!(BatchReport::default().success_rate(), 0.0);
    }
}
