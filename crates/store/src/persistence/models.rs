//! Row types for the database backend

use chrono::{DateTime, Utc};

use super::backend::decode_result;
use crate::codec::Serializer;
use crate::error::StoreError;
use crate::model::{GroupMeta, TaskMeta, TaskStatus};

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub task_id: String,
    pub status: String,
    pub result: Option<Vec<u8>>,
    pub traceback: Option<String>,
    pub date_done: Option<i64>,
}

impl TaskRow {
    pub fn into_meta(self, serializer: &dyn Serializer) -> Result<TaskMeta, StoreError> {
        let status: TaskStatus = self.status.parse()?;
        let result = decode_result(serializer, status, self.result.as_deref())?;
        let date_done = self.date_done.map(from_millis).transpose()?;

        Ok(TaskMeta {
            task_id: self.task_id,
            status,
            result,
            traceback: self.traceback,
            date_done,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct GroupRow {
    pub group_id: String,
    pub result: Vec<u8>,
    pub date_done: i64,
}

impl GroupRow {
    pub fn into_meta(self, serializer: &dyn Serializer) -> Result<GroupMeta, StoreError> {
        Ok(GroupMeta {
            result: serializer.deserialize(&self.result)?,
            date_done: from_millis(self.date_done)?,
            group_id: self.group_id,
        })
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::CorruptRecord(format!("date_done out of range: {millis}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonSerializer;
    use crate::model::TaskResult;
    use serde_json::json;

    #[test]
    fn test_task_row_into_meta() {
        let row = TaskRow {
            task_id: "t1".into(),
            status: "SUCCESS".into(),
            result: Some(br#"{"n":1}"#.to_vec()),
            traceback: None,
            date_done: Some(1_700_000_000_123),
        };

        let meta = row.into_meta(&JsonSerializer).unwrap();
        assert_eq!(meta.status, TaskStatus::Success);
        assert_eq!(meta.result, Some(TaskResult::Value(json!({"n": 1}))));
        assert_eq!(meta.date_done.map(to_millis), Some(1_700_000_000_123));
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let row = TaskRow {
            task_id: "t1".into(),
            status: "EXPLODED".into(),
            result: None,
            traceback: None,
            date_done: None,
        };
        assert!(matches!(
            row.into_meta(&JsonSerializer),
            Err(StoreError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_corrupt_group_blob() {
        let row = GroupRow {
            group_id: "g1".into(),
            result: b"{not json".to_vec(),
            date_done: 0,
        };
        assert!(matches!(
            row.into_meta(&JsonSerializer),
            Err(StoreError::Serialization { .. })
        ));
    }
}
