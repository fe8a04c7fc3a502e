//! # Task Result Store
//!
//! A SQL-backed store for the outcome of distributed tasks: status, result
//! payload, traceback and completion time per task, plus group results.
//!
//! ## Features
//!
//! - **Last-write-wins upserts**: every write is an atomic insert-or-update keyed by id
//! - **Automatic retries**: transient database errors are retried with bounded linear backoff
//! - **Fork-aware sessions**: pools opened before a fork are never reused in the child
//! - **Pluggable payload encoding**: JSON by default, YAML on request
//! - **Expiry sweeps**: `cleanup` removes records past their retention
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ResultBackend                          │
//! │  (mark_as_*, get_*, save/restore group, cleanup, wait_for)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 DatabaseBackend + RetryPolicy                │
//! │  (one scoped transaction per attempt, transient -> retry)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SessionManager                          │
//! │  (per-process engines and sessions, reset after fork)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use taskvault_store::prelude::*;
//!
//! # async fn run() -> Result<(), StoreError> {
//! let backend = DatabaseBackend::new(StoreConfig::new("sqlite://results.db?mode=rwc"))?;
//!
//! backend.mark_as_started("task-1").await?;
//! backend.mark_as_done("task-1", json!({"answer": 42})).await?;
//!
//! assert_eq!(backend.get_status("task-1").await?, TaskStatus::Success);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod persistence;
pub mod reliability;
pub mod session;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::StoreConfig;
    pub use crate::error::StoreError;
    pub use crate::model::{ExceptionInfo, GroupMeta, TaskMeta, TaskResult, TaskStatus};
    pub use crate::persistence::{DatabaseBackend, InMemoryBackend, ResultBackend};
    pub use crate::reliability::RetryPolicy;
}

// Re-export key types at crate root
pub use codec::{JsonSerializer, Serializer, SerializerKind, YamlSerializer};
pub use config::{Dialect, StoreConfig, TableNames, DEFAULT_RESULT_EXPIRES};
pub use error::StoreError;
pub use model::{CleanupReport, ExceptionInfo, GroupMeta, TaskMeta, TaskResult, TaskStatus};
pub use persistence::{DatabaseBackend, InMemoryBackend, ResultBackend, MIN_POLL_INTERVAL};
pub use reliability::{RetryPolicy, Retryable};
pub use session::{
    AnyPoolFactory, ConnectionFactory, Engine, EngineOptions, ManagedSession, Session,
    SessionManager, SessionScope, SharedSession,
};
