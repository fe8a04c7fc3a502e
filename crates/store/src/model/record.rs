//! Domain records returned by result backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TaskStatus;

/// A captured exception, in a form any worker language can produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Exception type name (e.g. `KeyError`, `TimeoutError`)
    pub exc_type: String,

    /// Human readable message
    pub exc_message: String,

    /// Module or namespace the type lives in, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exc_module: Option<String>,
}

impl ExceptionInfo {
    pub fn new(exc_type: impl Into<String>, exc_message: impl Into<String>) -> Self {
        Self {
            exc_type: exc_type.into(),
            exc_message: exc_message.into(),
            exc_module: None,
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.exc_module = Some(module.into());
        self
    }
}

impl std::fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.exc_module {
            Some(module) => write!(f, "{}.{}: {}", module, self.exc_type, self.exc_message),
            None => write!(f, "{}: {}", self.exc_type, self.exc_message),
        }
    }
}

/// Outcome stored for a task
///
/// Which variant a stored blob decodes into is decided by the task status:
/// `SUCCESS` holds a value, `RETRY` and `FAILURE` hold an exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskResult {
    Value(Value),
    Exception(ExceptionInfo),
}

impl TaskResult {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Exception(_) => None,
        }
    }

    pub fn as_exception(&self) -> Option<&ExceptionInfo> {
        match self {
            Self::Exception(exc) => Some(exc),
            Self::Value(_) => None,
        }
    }
}

/// Everything known about a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub traceback: Option<String>,
    pub date_done: Option<DateTime<Utc>>,
}

impl TaskMeta {
    /// Meta for a task that has no record
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            result: None,
            traceback: None,
            date_done: None,
        }
    }
}

impl std::fmt::Display for TaskMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Task {} state: {}>", self.task_id, self.status)
    }
}

/// Everything known about a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMeta {
    pub group_id: String,
    pub result: Value,
    pub date_done: DateTime<Utc>,
}

impl std::fmt::Display for GroupMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Group {}>", self.group_id)
    }
}

/// Number of records removed by an expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub tasks_deleted: u64,
    pub groups_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_meta() {
        let meta = TaskMeta::pending("xxx-does-not-exist");
        assert_eq!(meta.status, TaskStatus::Pending);
        assert!(meta.result.is_none());
        assert!(meta.traceback.is_none());
        assert!(meta.date_done.is_none());
    }

    #[test]
    fn test_display_contains_ids() {
        assert_eq!(TaskMeta::pending("foo").to_string(), "<Task foo state: PENDING>");

        let group = GroupMeta {
            group_id: "foo".into(),
            result: Value::Null,
            date_done: Utc::now(),
        };
        assert!(group.to_string().contains("foo"));
    }

    #[test]
    fn test_exception_display() {
        let exc = ExceptionInfo::new("KeyError", "'foo'").with_module("builtins");
        assert_eq!(exc.to_string(), "builtins.KeyError: 'foo'");
    }

    #[test]
    fn test_exception_shape() {
        let value = serde_json::to_value(ExceptionInfo::new("KeyError", "foo")).unwrap();
        assert_eq!(value, json!({"exc_type": "KeyError", "exc_message": "foo"}));
    }

    #[test]
    fn test_task_result_accessors() {
        let value = TaskResult::Value(json!(42));
        assert_eq!(value.as_value(), Some(&json!(42)));
        assert!(value.as_exception().is_none());

        let exc = TaskResult::Exception(ExceptionInfo::new("KeyError", "foo"));
        assert!(exc.as_value().is_none());
        assert_eq!(exc.as_exception().unwrap().exc_type, "KeyError");
    }
}
