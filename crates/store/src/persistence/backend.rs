//! ResultBackend trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::codec::Serializer;
use crate::error::StoreError;
use crate::model::{CleanupReport, ExceptionInfo, GroupMeta, TaskMeta, TaskResult, TaskStatus};

/// Shortest delay between polls in [`ResultBackend::wait_for`]
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Persistent store for task and group results
///
/// Reads of unknown ids are not errors: tasks read as `PENDING` with no
/// result, groups read as `None`. Every write is an upsert keyed by id, so the
/// last write wins and repeating a write is never an error.
#[async_trait]
pub trait ResultBackend: Send + Sync {
    /// Retention used by [`cleanup_expired`](ResultBackend::cleanup_expired)
    fn result_expires(&self) -> Duration;

    // =========================================================================
    // Task operations
    // =========================================================================

    /// Upsert the record for `task_id`
    ///
    /// `date_done` is set to now, except for `PENDING` and `STARTED`, which
    /// clear it. `result` is dropped for statuses that carry none
    /// (`PENDING`, `STARTED`, `REVOKED`) and `traceback` is kept only for
    /// `RETRY` and `FAILURE`.
    async fn store_result(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&TaskResult>,
        traceback: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn get_task_meta(&self, task_id: &str) -> Result<TaskMeta, StoreError>;

    /// Delete the record; later reads see `PENDING`
    async fn forget(&self, task_id: &str) -> Result<(), StoreError>;

    // =========================================================================
    // Group operations
    // =========================================================================

    /// Upsert a group result and hand the value back
    async fn save_group(&self, group_id: &str, result: Value) -> Result<Value, StoreError>;

    async fn get_group_meta(&self, group_id: &str) -> Result<Option<GroupMeta>, StoreError>;

    async fn delete_group(&self, group_id: &str) -> Result<(), StoreError>;

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Delete task and group records finished more than `retention` ago
    ///
    /// Tasks without a `date_done` (started, not finished) are kept.
    async fn cleanup(&self, retention: Duration) -> Result<CleanupReport, StoreError>;

    /// Release per-process resources; stored data is untouched
    async fn process_cleanup(&self) -> Result<(), StoreError> {
        Ok(())
    }

    // =========================================================================
    // Provided helpers
    // =========================================================================

    async fn get_status(&self, task_id: &str) -> Result<TaskStatus, StoreError> {
        Ok(self.get_task_meta(task_id).await?.status)
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>, StoreError> {
        Ok(self.get_task_meta(task_id).await?.result)
    }

    async fn get_traceback(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_task_meta(task_id).await?.traceback)
    }

    async fn mark_as_started(&self, task_id: &str) -> Result<(), StoreError> {
        self.store_result(task_id, TaskStatus::Started, None, None)
            .await
    }

    async fn mark_as_done(&self, task_id: &str, value: Value) -> Result<(), StoreError> {
        let result = TaskResult::Value(value);
        self.store_result(task_id, TaskStatus::Success, Some(&result), None)
            .await
    }

    async fn mark_as_retry(
        &self,
        task_id: &str,
        exc: &ExceptionInfo,
        traceback: &str,
    ) -> Result<(), StoreError> {
        let result = TaskResult::Exception(exc.clone());
        self.store_result(task_id, TaskStatus::Retry, Some(&result), Some(traceback))
            .await
    }

    async fn mark_as_failure(
        &self,
        task_id: &str,
        exc: &ExceptionInfo,
        traceback: &str,
    ) -> Result<(), StoreError> {
        let result = TaskResult::Exception(exc.clone());
        self.store_result(task_id, TaskStatus::Failure, Some(&result), Some(traceback))
            .await
    }

    async fn mark_as_revoked(&self, task_id: &str) -> Result<(), StoreError> {
        self.store_result(task_id, TaskStatus::Revoked, None, None)
            .await
    }

    async fn restore_group(&self, group_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get_group_meta(group_id).await?.map(|meta| meta.result))
    }

    /// [`cleanup`](ResultBackend::cleanup) with the configured retention
    async fn cleanup_expired(&self) -> Result<CleanupReport, StoreError> {
        self.cleanup(self.result_expires()).await
    }

    /// Poll until the task is ready
    ///
    /// Returns the ready meta, or [`StoreError::Timeout`] once `timeout` has
    /// elapsed without the task finishing. `interval` is raised to
    /// [`MIN_POLL_INTERVAL`] if shorter.
    async fn wait_for(
        &self,
        task_id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<TaskMeta, StoreError> {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let started = tokio::time::Instant::now();
        loop {
            let meta = self.get_task_meta(task_id).await?;
            if meta.status.is_ready() {
                return Ok(meta);
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(StoreError::Timeout {
                    task_id: task_id.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(interval.min(timeout - waited)).await;
        }
    }
}

/// A task write after status rules have been applied, ready for storage
#[derive(Debug, Clone)]
pub(crate) struct EncodedTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Option<Vec<u8>>,
    pub traceback: Option<String>,
    pub date_done: Option<DateTime<Utc>>,
}

impl EncodedTask {
    pub(crate) fn new(
        serializer: &dyn Serializer,
        task_id: &str,
        status: TaskStatus,
        result: Option<&TaskResult>,
        traceback: Option<&str>,
    ) -> Result<Self, StoreError> {
        let result = match status {
            TaskStatus::Pending | TaskStatus::Started | TaskStatus::Revoked => None,
            _ => result.map(|r| encode_result(serializer, r)).transpose()?,
        };
        let traceback = traceback
            .filter(|_| status.is_exception())
            .map(str::to_string);
        let date_done =
            (!matches!(status, TaskStatus::Pending | TaskStatus::Started)).then(Utc::now);

        Ok(Self {
            task_id: task_id.to_string(),
            status,
            result,
            traceback,
            date_done,
        })
    }
}

pub(crate) fn encode_result(
    serializer: &dyn Serializer,
    result: &TaskResult,
) -> Result<Vec<u8>, StoreError> {
    match result {
        TaskResult::Value(value) => serializer.serialize(value),
        TaskResult::Exception(exc) => {
            let value = serde_json::to_value(exc)
                .map_err(|e| StoreError::serialization(serializer.content_type(), e))?;
            serializer.serialize(&value)
        }
    }
}

/// Decode a stored blob into the variant the status calls for
pub(crate) fn decode_result(
    serializer: &dyn Serializer,
    status: TaskStatus,
    blob: Option<&[u8]>,
) -> Result<Option<TaskResult>, StoreError> {
    let Some(bytes) = blob else {
        return Ok(None);
    };

    match status {
        TaskStatus::Success => Ok(Some(TaskResult::Value(serializer.deserialize(bytes)?))),
        TaskStatus::Retry | TaskStatus::Failure => {
            let value = serializer.deserialize(bytes)?;
            let exc: ExceptionInfo = serde_json::from_value(value)
                .map_err(|e| StoreError::serialization(serializer.content_type(), e))?;
            Ok(Some(TaskResult::Exception(exc)))
        }
        TaskStatus::Pending | TaskStatus::Started | TaskStatus::Revoked => Ok(None),
    }
}
