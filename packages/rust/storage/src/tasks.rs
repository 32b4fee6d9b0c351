//! Lease-based task queue persistence.
//!
//! Every lifecycle transition is a single conditional `UPDATE`, so the
//! database decides races: of several workers locking the same PENDING task,
//! exactly one sees an affected row.

use chrono::{DateTime, Utc};
use coursebuilder_shared::{CourseBuilderError, ProcessingStatus, Result, Task, TaskType};
use libsql::{Row, Value, params, params_from_iter};

use crate::{
    Storage, col_i64, col_opt_json, col_opt_text, col_opt_timestamp, col_text, col_timestamp,
    db_err, from_json, now, timestamp, to_json,
};

const TASK_COLUMNS: &str = "id, document_id, segment_id, task_type, priority, status, worker_id, \
     started_at, completed_at, error_message, error_details_json, metadata_json, result_json, \
     created_at";

impl Storage {
    // -----------------------------------------------------------------------
    // Task operations
    // -----------------------------------------------------------------------

    /// Insert tasks in one transaction.
    pub async fn insert_tasks(&self, tasks: &[Task]) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        for task in tasks {
            tx.execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    task.id.as_str(),
                    task.document_id.as_str(),
                    task.segment_id.as_str(),
                    task.task_type.as_str(),
                    task.priority,
                    task.status.as_str(),
                    task.worker_id.as_deref(),
                    task.started_at.map(timestamp),
                    task.completed_at.map(timestamp),
                    task.error_message.as_deref(),
                    task.error_details.as_ref().map(to_json).transpose()?,
                    to_json(&task.metadata)?,
                    task.result.as_ref().map(to_json).transpose()?,
                    timestamp(task.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Get a task by ID.
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    /// List tasks in dispatch order, optionally filtered.
    pub async fn list_tasks(
        &self,
        document_id: Option<&str>,
        status: Option<ProcessingStatus>,
    ) -> Result<Vec<Task>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE (?1 IS NULL OR document_id = ?1)
                       AND (?2 IS NULL OR status = ?2)
                     ORDER BY priority DESC, created_at ASC, rowid ASC"
                ),
                params![document_id, status.map(|s| s.as_str())],
            )
            .await
            .map_err(db_err)?;
        collect_tasks(&mut rows).await
    }

    /// Up to `limit` PENDING tasks, highest priority first, oldest first
    /// within a priority. An empty `task_types` slice means every type.
    pub async fn get_pending_tasks(&self, limit: u32, task_types: &[TaskType]) -> Result<Vec<Task>> {
        let mut values: Vec<Value> = task_types
            .iter()
            .map(|t| Value::Text(t.as_str().to_string()))
            .collect();
        let type_filter = if task_types.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> =
                (1..=task_types.len()).map(|i| format!("?{i}")).collect();
            format!("AND task_type IN ({})", placeholders.join(", "))
        };
        values.push(Value::Integer(limit as i64));
        let limit_idx = values.len();

        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE status = 'PENDING' {type_filter}
                     ORDER BY priority DESC, created_at ASC, rowid ASC
                     LIMIT ?{limit_idx}"
                ),
                params_from_iter(values),
            )
            .await
            .map_err(db_err)?;
        collect_tasks(&mut rows).await
    }

    /// Atomically lease a PENDING task to `worker_id`.
    ///
    /// Returns `false` when the task is missing or no longer PENDING.
    pub async fn lock_task(&self, id: &str, worker_id: &str) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE tasks SET status = 'PROCESSING', worker_id = ?1, started_at = ?2
                 WHERE id = ?3 AND status = 'PENDING'",
                params![worker_id, now(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(affected == 1)
    }

    /// Move a PROCESSING task leased by `worker_id` to COMPLETED, recording
    /// its result.
    pub async fn complete_task(
        &self,
        id: &str,
        worker_id: &str,
        result: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.check_writable()?;
        let result_json = result.map(to_json).transpose()?;
        let affected = self
            .conn
            .execute(
                "UPDATE tasks SET status = 'COMPLETED', completed_at = ?1, result_json = ?2,
                        worker_id = NULL
                 WHERE id = ?3 AND status = 'PROCESSING' AND worker_id = ?4",
                params![now(), result_json, id, worker_id],
            )
            .await
            .map_err(db_err)?;
        self.check_transition(affected, id, worker_id).await
    }

    /// Move a PROCESSING task leased by `worker_id` to FAILED, recording the
    /// error.
    pub async fn fail_task(
        &self,
        id: &str,
        worker_id: &str,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.check_writable()?;
        let details_json = details.map(to_json).transpose()?;
        let affected = self
            .conn
            .execute(
                "UPDATE tasks SET status = 'FAILED', completed_at = ?1, error_message = ?2,
                        error_details_json = ?3, worker_id = NULL
                 WHERE id = ?4 AND status = 'PROCESSING' AND worker_id = ?5",
                params![now(), message, details_json, id, worker_id],
            )
            .await
            .map_err(db_err)?;
        self.check_transition(affected, id, worker_id).await
    }

    /// Return PROCESSING tasks leased before `cutoff` to PENDING.
    pub async fn sweep_stale_leases(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE tasks SET status = 'PENDING', worker_id = NULL, started_at = NULL
                 WHERE status = 'PROCESSING' AND started_at < ?1",
                params![timestamp(cutoff)],
            )
            .await
            .map_err(db_err)?;
        Ok(affected)
    }

    /// Map a zero-row conditional update to the precise error.
    async fn check_transition(&self, affected: u64, id: &str, worker_id: &str) -> Result<()> {
        if affected > 0 {
            return Ok(());
        }
        match self.get_task(id).await? {
            None => Err(CourseBuilderError::not_found("task", id)),
            Some(task) if task.status == ProcessingStatus::Processing => {
                Err(CourseBuilderError::invalid_transition(
                    id,
                    format!(
                        "lease held by {}, not {worker_id}",
                        task.worker_id.as_deref().unwrap_or("nobody")
                    ),
                ))
            }
            Some(task) => Err(CourseBuilderError::invalid_transition(
                id,
                format!(
                    "expected {}, found {}",
                    ProcessingStatus::Processing.as_str(),
                    task.status.as_str()
                ),
            )),
        }
    }
}

async fn collect_tasks(rows: &mut libsql::Rows) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        tasks.push(row_to_task(&row)?);
    }
    Ok(tasks)
}

fn row_to_task(row: &Row) -> Result<Task> {
    let type_raw = col_text(row, 3)?;
    let task_type = TaskType::parse(&type_raw)
        .ok_or_else(|| CourseBuilderError::Storage(format!("unknown task type {type_raw:?}")))?;
    let status_raw = col_text(row, 5)?;
    let status = ProcessingStatus::parse(&status_raw).ok_or_else(|| {
        CourseBuilderError::Storage(format!("unknown task status {status_raw:?}"))
    })?;

    Ok(Task {
        id: col_text(row, 0)?,
        document_id: col_text(row, 1)?,
        segment_id: col_text(row, 2)?,
        task_type,
        priority: col_i64(row, 4)?,
        status,
        worker_id: col_opt_text(row, 6),
        started_at: col_opt_timestamp(row, 7)?,
        completed_at: col_opt_timestamp(row, 8)?,
        error_message: col_opt_text(row, 9),
        error_details: col_opt_json(row, 10)?,
        metadata: from_json(&col_text(row, 11)?)?,
        result: col_opt_json(row, 12)?,
        created_at: col_timestamp(row, 13)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::{seeded_document, test_storage};
    use serde_json::json;

    use super::*;

    async fn seeded_tasks(storage: &Storage, priorities: &[i64]) -> (String, Vec<Task>) {
        let doc = seeded_document(storage, 50).await;
        let tasks: Vec<Task> = priorities
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                Task::pending(
                    &doc.id,
                    &format!("seg-{i}"),
                    TaskType::TextWorker,
                    p,
                    json!({ "seg_no": i + 1 }),
                )
            })
            .collect();
        storage.insert_tasks(&tasks).await.unwrap();
        (doc.id, tasks)
    }

    #[tokio::test]
    async fn pending_tasks_follow_priority_then_age() {
        let storage = test_storage().await;
        let (_, tasks) = seeded_tasks(&storage, &[5, 9, 5, 7]).await;

        let pending = storage.get_pending_tasks(10, &[]).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                tasks[1].id.as_str(),
                tasks[3].id.as_str(),
                tasks[0].id.as_str(),
                tasks[2].id.as_str()
            ]
        );

        assert_eq!(storage.get_pending_tasks(2, &[]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let storage = test_storage().await;
        let (_, tasks) = seeded_tasks(&storage, &[9]).await;
        let id = tasks[0].id.as_str();

        let (a, b) = tokio::join!(
            storage.lock_task(id, "worker-a"),
            storage.lock_task(id, "worker-b")
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a ^ b, "exactly one lock must win");

        let task = storage.get_task(id).await.unwrap().expect("task");
        assert_eq!(task.status, ProcessingStatus::Processing);
        let winner = if a { "worker-a" } else { "worker-b" };
        assert_eq!(task.worker_id.as_deref(), Some(winner));
        assert!(task.started_at.is_some());
        assert!(storage.get_pending_tasks(10, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_missing_task_returns_false() {
        let storage = test_storage().await;
        assert!(!storage.lock_task("ghost", "w").await.unwrap());
    }

    #[tokio::test]
    async fn complete_records_result() {
        let storage = test_storage().await;
        let (_, tasks) = seeded_tasks(&storage, &[9]).await;
        let id = tasks[0].id.as_str();

        storage.lock_task(id, "w").await.unwrap();
        storage
            .complete_task(id, "w", Some(&json!({ "pages": 10 })))
            .await
            .unwrap();

        let task = storage.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, ProcessingStatus::Completed);
        assert!(task.completed_at.is_some());
        assert!(task.worker_id.is_none());
        assert_eq!(task.result, Some(json!({ "pages": 10 })));
    }

    #[tokio::test]
    async fn complete_requires_processing() {
        let storage = test_storage().await;
        let (_, tasks) = seeded_tasks(&storage, &[9]).await;

        let err = storage.complete_task(&tasks[0].id, "w", None).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::InvalidTransition { .. }));

        let err = storage.complete_task("ghost", "w", None).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn transitions_require_the_current_lease() {
        let storage = test_storage().await;
        let (_, tasks) = seeded_tasks(&storage, &[9]).await;
        let id = tasks[0].id.as_str();

        assert!(storage.lock_task(id, "worker-a").await.unwrap());
        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(storage.sweep_stale_leases(future).await.unwrap(), 1);
        assert!(storage.lock_task(id, "worker-b").await.unwrap());

        let err = storage.complete_task(id, "worker-a", None).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::InvalidTransition { .. }));
        let err = storage.fail_task(id, "worker-a", "late", None).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::InvalidTransition { .. }));

        let task = storage.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, ProcessingStatus::Processing);
        assert_eq!(task.worker_id.as_deref(), Some("worker-b"));

        storage.complete_task(id, "worker-b", None).await.unwrap();
        let task = storage.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn fail_records_error_and_is_terminal() {
        let storage = test_storage().await;
        let (_, tasks) = seeded_tasks(&storage, &[9]).await;
        let id = tasks[0].id.as_str();

        storage.lock_task(id, "w").await.unwrap();
        storage
            .fail_task(id, "w", "boom", Some(&json!({ "attempts": 3 })))
            .await
            .unwrap();

        let failed = storage.get_task(id).await.unwrap().unwrap();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(failed.error_details, Some(json!({ "attempts": 3 })));

        // FAILED is terminal: no second failure, no relock.
        let err = storage.fail_task(id, "w", "again", None).await.unwrap_err();
        assert!(matches!(err, CourseBuilderError::InvalidTransition { .. }));
        assert!(!storage.lock_task(id, "w2").await.unwrap());
    }

    #[tokio::test]
    async fn pending_tasks_filter_by_type() {
        let storage = test_storage().await;
        let (doc_id, _) = seeded_tasks(&storage, &[9, 8]).await;
        let image_task = Task::pending(&doc_id, "seg-x", TaskType::ImageWorker, 1, json!({}));
        storage.insert_tasks(std::slice::from_ref(&image_task)).await.unwrap();

        let images = storage
            .get_pending_tasks(10, &[TaskType::ImageWorker])
            .await
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, image_task.id);

        let both = storage
            .get_pending_tasks(10, &[TaskType::TextWorker, TaskType::ImageWorker])
            .await
            .unwrap();
        assert_eq!(both.len(), 3);
    }

    #[tokio::test]
    async fn sweep_reclaims_only_expired_leases() {
        let storage = test_storage().await;
        let (_, tasks) = seeded_tasks(&storage, &[9, 8]).await;
        storage.lock_task(&tasks[0].id, "w").await.unwrap();

        // Cutoff in the past: nothing expired yet.
        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(storage.sweep_stale_leases(past).await.unwrap(), 0);

        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(storage.sweep_stale_leases(future).await.unwrap(), 1);

        let task = storage.get_task(&tasks[0].id).await.unwrap().unwrap();
        assert_eq!(task.status, ProcessingStatus::Pending);
        assert!(task.worker_id.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_document_and_status() {
        let storage = test_storage().await;
        let (doc_id, tasks) = seeded_tasks(&storage, &[9, 8]).await;
        storage.lock_task(&tasks[0].id, "w").await.unwrap();

        let all = storage.list_tasks(Some(&doc_id), None).await.unwrap();
        assert_eq!(all.len(), 2);
        let processing = storage
            .list_tasks(None, Some(ProcessingStatus::Processing))
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, tasks[0].id);
    }
}
