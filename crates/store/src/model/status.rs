//! Task status state machine

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle status of a task
///
/// A task with no stored record is `Pending`.
///
/// ```text
///            ┌──────────────────────────────┐
///            ▼                              │
/// Pending ─► Started ─► Retry ──────────────┘
///               │         │
///               ▼         ▼
///        Success | Failure | Revoked
/// ```
///
/// The terminal statuses end the normal flow but the store still accepts
/// writes over them; enforcing the flow is up to the caller
/// (see [`TaskStatus::can_transition_to`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// No record, or not yet picked up by a worker
    Pending,

    /// A worker started executing the task
    Started,

    /// The task failed and is scheduled to run again
    Retry,

    /// The task finished and returned a value
    Success,

    /// The task raised an exception
    Failure,

    /// The task was cancelled
    Revoked,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::Started,
        Self::Retry,
        Self::Success,
        Self::Failure,
        Self::Revoked,
    ];

    /// Persisted name of the status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Retry => "RETRY",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Revoked => "REVOKED",
        }
    }

    /// Whether the task has reached the end of its normal flow
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    /// Whether the stored result is a captured exception
    pub fn is_exception(self) -> bool {
        matches!(self, Self::Retry | Self::Failure)
    }

    /// Whether `next` follows `self` in the normal task flow
    ///
    /// Every status can be reached directly from `Pending`, because a worker
    /// may report (or a client may revoke) before any earlier write landed.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, next) {
            (Pending, _) => true,
            (Started, Retry | Success | Failure | Revoked) => true,
            (Retry, Started | Success | Failure | Revoked) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::CorruptRecord(format!("unknown task status: {s}")))
    }
}
