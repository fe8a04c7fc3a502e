//! In-memory implementation of ResultBackend for testing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use super::backend::{decode_result, EncodedTask, ResultBackend};
use crate::codec::{JsonSerializer, Serializer};
use crate::config::DEFAULT_RESULT_EXPIRES;
use crate::error::StoreError;
use crate::model::{CleanupReport, GroupMeta, TaskMeta, TaskResult, TaskStatus};

/// Stored group blob
struct GroupState {
    result: Vec<u8>,
    date_done: DateTime<Utc>,
}

/// In-memory implementation of ResultBackend
///
/// Payloads still go through the serializer, so encode and decode failures
/// behave exactly as they do against a database.
///
/// # Example
///
/// ```
/// use taskvault_store::InMemoryBackend;
///
/// let backend = InMemoryBackend::new();
/// ```
pub struct InMemoryBackend {
    tasks: RwLock<HashMap<String, EncodedTask>>,
    groups: RwLock<HashMap<String, GroupState>>,
    serializer: Arc<dyn Serializer>,
    result_expires: Duration,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_serializer(Arc::new(JsonSerializer))
    }

    pub fn with_serializer(serializer: Arc<dyn Serializer>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            serializer,
            result_expires: DEFAULT_RESULT_EXPIRES,
        }
    }

    pub fn with_result_expires(mut self, expires: Duration) -> Self {
        self.result_expires = expires;
        self
    }

    /// Get the number of stored tasks
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Get the number of stored groups
    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultBackend for InMemoryBackend {
    fn result_expires(&self) -> Duration {
        self.result_expires
    }

    async fn store_result(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&TaskResult>,
        traceback: Option<&str>,
    ) -> Result<(), StoreError> {
        let task = EncodedTask::new(self.serializer.as_ref(), task_id, status, result, traceback)?;
        self.tasks.write().insert(task_id.to_string(), task);
        Ok(())
    }

    async fn get_task_meta(&self, task_id: &str) -> Result<TaskMeta, StoreError> {
        let tasks = self.tasks.read();
        let Some(task) = tasks.get(task_id) else {
            return Ok(TaskMeta::pending(task_id));
        };

        Ok(TaskMeta {
            task_id: task.task_id.clone(),
            status: task.status,
            result: decode_result(self.serializer.as_ref(), task.status, task.result.as_deref())?,
            traceback: task.traceback.clone(),
            date_done: task.date_done,
        })
    }

    async fn forget(&self, task_id: &str) -> Result<(), StoreError> {
        self.tasks.write().remove(task_id);
        Ok(())
    }

    async fn save_group(&self, group_id: &str, result: Value) -> Result<Value, StoreError> {
        let blob = self.serializer.serialize(&result)?;
        self.groups.write().insert(
            group_id.to_string(),
            GroupState {
                result: blob,
                date_done: Utc::now(),
            },
        );
        Ok(result)
    }

    async fn get_group_meta(&self, group_id: &str) -> Result<Option<GroupMeta>, StoreError> {
        let groups = self.groups.read();
        groups
            .get(group_id)
            .map(|group| {
                Ok(GroupMeta {
                    group_id: group_id.to_string(),
                    result: self.serializer.deserialize(&group.result)?,
                    date_done: group.date_done,
                })
            })
            .transpose()
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), StoreError> {
        self.groups.write().remove(group_id);
        Ok(())
    }

    async fn cleanup(&self, retention: Duration) -> Result<CleanupReport, StoreError> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let Some(cutoff) = cutoff else {
            return Ok(CleanupReport::default());
        };

        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, task| task.date_done.map_or(true, |done| done >= cutoff));
        let tasks_deleted = (before - tasks.len()) as u64;

        let mut groups = self.groups.write();
        let before = groups.len();
        groups.retain(|_, group| group.date_done >= cutoff);
        let groups_deleted = (before - groups.len()) as u64;

        Ok(CleanupReport {
            tasks_deleted,
            groups_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::YamlSerializer;
    use crate::model::ExceptionInfo;
    use serde_json::json;

    fn backdate_task(backend: &InMemoryBackend, task_id: &str, by: Duration) {
        let mut tasks = backend.tasks.write();
        let task = tasks.get_mut(task_id).unwrap();
        task.date_done = Some(Utc::now() - chrono::Duration::from_std(by).unwrap());
    }

    fn backdate_group(backend: &InMemoryBackend, group_id: &str, by: Duration) {
        let mut groups = backend.groups.write();
        let group = groups.get_mut(group_id).unwrap();
        group.date_done = Utc::now() - chrono::Duration::from_std(by).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_task_is_pending() {
        let backend = InMemoryBackend::new();
        let meta = backend.get_task_meta("missing").await.unwrap();

        assert_eq!(meta.status, TaskStatus::Pending);
        assert!(meta.result.is_none());
        assert!(meta.traceback.is_none());
        assert!(meta.date_done.is_none());
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let backend = InMemoryBackend::new();

        backend.mark_as_started("t1").await.unwrap();
        assert_eq!(backend.get_status("t1").await.unwrap(), TaskStatus::Started);
        assert!(backend.get_result("t1").await.unwrap().is_none());

        backend.mark_as_done("t1", json!(42)).await.unwrap();
        let meta = backend.get_task_meta("t1").await.unwrap();
        assert_eq!(meta.status, TaskStatus::Success);
        assert_eq!(meta.result, Some(TaskResult::Value(json!(42))));
        assert!(meta.date_done.is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_exception_and_traceback() {
        let backend = InMemoryBackend::new();
        let exc = ExceptionInfo::new("KeyError", "foo");

        backend
            .mark_as_failure("t1", &exc, "Traceback (most recent call last)")
            .await
            .unwrap();

        assert_eq!(
            backend.get_result("t1").await.unwrap(),
            Some(TaskResult::Exception(exc))
        );
        assert_eq!(
            backend.get_traceback("t1").await.unwrap().as_deref(),
            Some("Traceback (most recent call last)")
        );
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let backend = InMemoryBackend::new();

        backend.mark_as_done("t1", json!(1)).await.unwrap();
        backend.mark_as_done("t1", json!(2)).await.unwrap();
        backend.mark_as_revoked("t1").await.unwrap();

        let meta = backend.get_task_meta("t1").await.unwrap();
        assert_eq!(meta.status, TaskStatus::Revoked);
        assert!(meta.result.is_none());
        assert_eq!(backend.task_count(), 1);
    }

    #[tokio::test]
    async fn test_forget() {
        let backend = InMemoryBackend::new();
        backend.mark_as_done("t1", json!("x")).await.unwrap();

        backend.forget("t1").await.unwrap();
        backend.forget("t1").await.unwrap();

        assert_eq!(backend.get_status("t1").await.unwrap(), TaskStatus::Pending);
        assert!(backend.get_result("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_groups() {
        let backend = InMemoryBackend::new();
        let value = json!(["t1", "t2", "t3"]);

        assert_eq!(backend.save_group("g1", value.clone()).await.unwrap(), value);
        assert_eq!(backend.restore_group("g1").await.unwrap(), Some(value));

        backend.delete_group("g1").await.unwrap();
        assert!(backend.restore_group("g1").await.unwrap().is_none());
        assert!(backend.get_group_meta("never").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let backend = InMemoryBackend::new();
        let day = Duration::from_secs(86_400);

        backend.mark_as_done("old", json!(1)).await.unwrap();
        backend.mark_as_done("new", json!(2)).await.unwrap();
        backend.mark_as_started("running").await.unwrap();
        backend.save_group("old-group", json!([])).await.unwrap();
        backend.save_group("new-group", json!([])).await.unwrap();

        backdate_task(&backend, "old", 2 * day);
        backdate_group(&backend, "old-group", 2 * day);

        let report = backend.cleanup(day).await.unwrap();

        assert_eq!(
            report,
            CleanupReport {
                tasks_deleted: 1,
                groups_deleted: 1
            }
        );
        assert_eq!(backend.get_status("old").await.unwrap(), TaskStatus::Pending);
        assert_eq!(backend.get_status("new").await.unwrap(), TaskStatus::Success);
        assert_eq!(backend.get_status("running").await.unwrap(), TaskStatus::Started);
        assert!(backend.restore_group("new-group").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_expired_uses_configured_retention() {
        let backend = InMemoryBackend::new().with_result_expires(Duration::from_secs(60));
        backend.mark_as_done("t1", json!(1)).await.unwrap();
        backdate_task(&backend, "t1", Duration::from_secs(120));

        let report = backend.cleanup_expired().await.unwrap();
        assert_eq!(report.tasks_deleted, 1);
    }

    #[tokio::test]
    async fn test_huge_retention_deletes_nothing() {
        let backend = InMemoryBackend::new();
        backend.mark_as_done("t1", json!(1)).await.unwrap();

        let report = backend.cleanup(Duration::MAX).await.unwrap();
        assert_eq!(report, CleanupReport::default());
        assert_eq!(backend.task_count(), 1);
    }

    #[tokio::test]
    async fn test_yaml_serializer() {
        let backend = InMemoryBackend::with_serializer(Arc::new(YamlSerializer));
        let value = json!({"foo": "baz", "bar": {"data": 12345}});

        backend.mark_as_done("t1", value.clone()).await.unwrap();
        assert_eq!(
            backend.get_result("t1").await.unwrap(),
            Some(TaskResult::Value(value))
        );
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_not_no_result() {
        let backend = InMemoryBackend::new();
        backend.mark_as_done("t1", json!(1)).await.unwrap();
        backend.tasks.write().get_mut("t1").unwrap().result = Some(b"\xffgarbage".to_vec());

        let err = backend.get_result("t1").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ready_and_timeout() {
        let backend = InMemoryBackend::new();
        backend.mark_as_started("t1").await.unwrap();

        let err = backend
            .wait_for("t1", Duration::from_secs(2), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { ref task_id, .. } if task_id == "t1"));

        backend.mark_as_done("t1", json!("ok")).await.unwrap();
        let meta = backend
            .wait_for("t1", Duration::from_secs(2), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(meta.status, TaskStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_zero_interval_still_sleeps() {
        let backend = InMemoryBackend::new();
        backend.mark_as_started("t1").await.unwrap();
        let started = tokio::time::Instant::now();

        let err = backend
            .wait_for("t1", Duration::from_millis(100), Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
