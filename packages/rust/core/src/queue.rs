//! Lease-based, priority-ordered task queue.
//!
//! The queue only brackets the lease: it hands out PENDING tasks, records
//! completion or failure, and never runs the work itself. Exclusivity comes
//! from the conditional update in [`Storage::lock_task`]; a lost race is a
//! normal `false`, after which the caller re-polls.
//!
//! Leases never expire on their own. A worker that crashes mid-task leaves
//! it PROCESSING until [`TaskQueue::sweep_expired_leases`] is run explicitly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use coursebuilder_shared::{CourseBuilderError, ProcessingStatus, Result, Task, TaskType};
use coursebuilder_storage::Storage;

/// Highest priority handed to segment 0; segment `n` gets `BASE_PRIORITY - n`.
const BASE_PRIORITY: i64 = 10;

// ---------------------------------------------------------------------------
// Worker identity
// ---------------------------------------------------------------------------

/// Opaque worker id, stable for the lifetime of one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    /// `worker-<unix millis>-<random suffix>`.
    pub fn generate() -> Self {
        let simple = Uuid::now_v7().simple().to_string();
        let suffix = &simple[simple.len() - 8..];
        Self(format!("worker-{}-{suffix}", Utc::now().timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub struct TaskQueue {
    storage: Arc<Storage>,
}

impl TaskQueue {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// One PENDING task per segment, earlier segments first.
    #[instrument(skip_all, fields(document_id = %document_id, task_type = task_type.as_str()))]
    pub async fn create_tasks_for_document(
        &self,
        document_id: &str,
        task_type: TaskType,
    ) -> Result<Vec<Task>> {
        self.storage.require_document(document_id).await?;
        let segments = self.storage.list_segments(document_id).await?;
        if segments.is_empty() {
            return Err(CourseBuilderError::validation(format!(
                "document {document_id} has no segments to enqueue"
            )));
        }

        let tasks: Vec<Task> = segments
            .iter()
            .map(|segment| {
                Task::pending(
                    document_id,
                    &segment.id,
                    task_type,
                    BASE_PRIORITY - segment.seg_no as i64,
                    json!({ "seg_no": segment.seg_no }),
                )
            })
            .collect();
        self.storage.insert_tasks(&tasks).await?;

        info!(count = tasks.len(), "enqueued tasks");
        Ok(tasks)
    }

    /// Up to `limit` PENDING tasks in dispatch order.
    pub async fn get_pending_tasks(&self, limit: u32) -> Result<Vec<Task>> {
        self.storage.get_pending_tasks(limit, &[]).await
    }

    /// Try to lease `task_id`. `false` means someone else holds it.
    pub async fn lock_task(&self, task_id: &str, worker: &WorkerId) -> Result<bool> {
        let locked = self.storage.lock_task(task_id, worker.as_str()).await?;
        debug!(task_id, worker_id = %worker, locked, "lock attempt");
        Ok(locked)
    }

    /// Finish a task `worker` still holds. A reclaimed or foreign lease is an
    /// `InvalidTransition`.
    pub async fn complete_task(
        &self,
        task_id: &str,
        worker: &WorkerId,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        self.storage
            .complete_task(task_id, worker.as_str(), result.as_ref())
            .await
    }

    /// Record a failure. The task is not requeued; see [`Self::retry_task`].
    pub async fn fail_task(
        &self,
        task_id: &str,
        worker: &WorkerId,
        error_message: &str,
        error_details: Option<serde_json::Value>,
    ) -> Result<()> {
        self.storage
            .fail_task(task_id, worker.as_str(), error_message, error_details.as_ref())
            .await
    }

    /// Poll and lease the next task of one of `task_types` (all types when
    /// empty). Re-polls after lost races; `None` when nothing is pending.
    pub async fn claim_next(
        &self,
        worker: &WorkerId,
        task_types: &[TaskType],
        poll_limit: u32,
    ) -> Result<Option<Task>> {
        loop {
            let pending = self
                .storage
                .get_pending_tasks(poll_limit.max(1), task_types)
                .await?;
            if pending.is_empty() {
                return Ok(None);
            }

            for candidate in &pending {
                if self.lock_task(&candidate.id, worker).await? {
                    return self.storage.get_task(&candidate.id).await;
                }
            }
            debug!(worker_id = %worker, lost = pending.len(), "lost every race, re-polling");
        }
    }

    /// Enqueue a fresh PENDING copy of a FAILED task.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn retry_task(&self, task_id: &str) -> Result<Task> {
        let failed = self
            .storage
            .get_task(task_id)
            .await?
            .ok_or_else(|| CourseBuilderError::not_found("task", task_id))?;
        if failed.status != ProcessingStatus::Failed {
            return Err(CourseBuilderError::invalid_transition(
                task_id,
                format!("only FAILED tasks can be retried, found {}", failed.status.as_str()),
            ));
        }

        let mut metadata = failed.metadata.clone();
        if let Some(map) = metadata.as_object_mut() {
            map.insert("retry_of".into(), json!(failed.id));
        } else {
            metadata = json!({ "retry_of": failed.id });
        }

        let task = Task::pending(
            &failed.document_id,
            &failed.segment_id,
            failed.task_type,
            failed.priority,
            metadata,
        );
        self.storage.insert_tasks(std::slice::from_ref(&task)).await?;
        info!(new_task_id = %task.id, "re-enqueued failed task");
        Ok(task)
    }

    /// Return leases older than `max_age` to PENDING. Never called
    /// implicitly.
    pub async fn sweep_expired_leases(&self, max_age: Duration) -> Result<u64> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| CourseBuilderError::validation(format!("lease age out of range: {e}")))?;
        let reclaimed = self.storage.sweep_stale_leases(Utc::now() - max_age).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed expired task leases");
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded_segments, temp_storage};

    #[test]
    fn worker_ids_are_distinct() {
        let a = WorkerId::generate();
        let b = WorkerId::generate();
        assert!(a.as_str().starts_with("worker-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn tasks_are_prioritized_by_segment_number() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10), (11, 20), (21, 30)]).await;
        let queue = TaskQueue::new(storage);

        let created = queue
            .create_tasks_for_document(&doc.id, TaskType::TextWorker)
            .await
            .unwrap();
        let priorities: Vec<i64> = created.iter().map(|t| t.priority).collect();
        assert_eq!(priorities, vec![9, 8, 7]);
        assert_eq!(created[2].metadata, json!({ "seg_no": 3 }));

        let pending = queue.get_pending_tasks(2).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, created[0].id);
    }

    #[tokio::test]
    async fn enqueue_without_segments_is_rejected() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[]).await;
        let queue = TaskQueue::new(storage);
        let err = queue
            .create_tasks_for_document(&doc.id, TaskType::TextWorker)
            .await
            .unwrap_err();
        assert!(matches!(err, CourseBuilderError::Validation { .. }));
    }

    #[tokio::test]
    async fn claim_next_leases_in_priority_order() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10), (11, 20)]).await;
        let queue = TaskQueue::new(storage);
        let created = queue
            .create_tasks_for_document(&doc.id, TaskType::TextWorker)
            .await
            .unwrap();

        let worker = WorkerId::from("worker-test");
        let first = queue.claim_next(&worker, &[], 10).await.unwrap().unwrap();
        assert_eq!(first.id, created[0].id);
        assert_eq!(first.status, ProcessingStatus::Processing);
        assert_eq!(first.worker_id.as_deref(), Some("worker-test"));

        let second = queue.claim_next(&worker, &[], 10).await.unwrap().unwrap();
        assert_eq!(second.id, created[1].id);
        assert!(queue.claim_next(&worker, &[], 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_next_respects_task_types() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10)]).await;
        let queue = TaskQueue::new(storage);
        queue
            .create_tasks_for_document(&doc.id, TaskType::ImageWorker)
            .await
            .unwrap();

        let worker = WorkerId::generate();
        assert!(
            queue
                .claim_next(&worker, &[TaskType::TextWorker], 10)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            queue
                .claim_next(&worker, &[TaskType::ImageWorker], 10)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn retry_requires_failed_task() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10)]).await;
        let queue = TaskQueue::new(storage);
        let created = queue
            .create_tasks_for_document(&doc.id, TaskType::TextWorker)
            .await
            .unwrap();
        let id = created[0].id.as_str();

        let err = queue.retry_task(id).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::InvalidTransition { .. }));

        let worker = WorkerId::generate();
        assert!(queue.lock_task(id, &worker).await.unwrap());
        queue.fail_task(id, &worker, "extraction failed", None).await.unwrap();

        let retried = queue.retry_task(id).await.unwrap();
        assert_ne!(retried.id, id);
        assert_eq!(retried.status, ProcessingStatus::Pending);
        assert_eq!(retried.segment_id, created[0].segment_id);
        assert_eq!(retried.metadata["retry_of"], json!(id));
        assert_eq!(retried.metadata["seg_no"], json!(1));

        // The failed original stays FAILED.
        let original = queue.storage().get_task(id).await.unwrap().unwrap();
        assert_eq!(original.status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn sweep_returns_old_leases_to_pending() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10)]).await;
        let queue = TaskQueue::new(storage);
        let created = queue
            .create_tasks_for_document(&doc.id, TaskType::TextWorker)
            .await
            .unwrap();
        queue
            .lock_task(&created[0].id, &WorkerId::generate())
            .await
            .unwrap();

        assert_eq!(
            queue
                .sweep_expired_leases(Duration::from_secs(3600))
                .await
                .unwrap(),
            0
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            queue
                .sweep_expired_leases(Duration::from_millis(1))
                .await
                .unwrap(),
            1
        );
        assert_eq!(queue.get_pending_tasks(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reclaimed_lease_cannot_be_completed_by_its_old_worker() {
        let storage = temp_storage().await;
        let (doc, _) = seeded_segments(&storage, &[(1, 10)]).await;
        let queue = TaskQueue::new(storage);
        let created = queue
            .create_tasks_for_document(&doc.id, TaskType::TextWorker)
            .await
            .unwrap();
        let id = created[0].id.as_str();
        let (slow, fresh) = (WorkerId::from("worker-slow"), WorkerId::from("worker-fresh"));

        assert!(queue.lock_task(id, &slow).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.sweep_expired_leases(Duration::from_millis(1)).await.unwrap(), 1);
        assert!(queue.lock_task(id, &fresh).await.unwrap());

        let err = queue.complete_task(id, &slow, None).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::InvalidTransition { .. }));
        let task = queue.storage().get_task(id).await.unwrap().unwrap();
        assert_eq!(task.worker_id.as_deref(), Some("worker-fresh"));

        queue.complete_task(id, &fresh, Some(json!({ "ok": true }))).await.unwrap();
    }
}
