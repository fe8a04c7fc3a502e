//! SQL implementation of ResultBackend
//!
//! Every operation runs inside the retry policy. Each attempt takes a session
//! from the [`SessionManager`], scopes it with a [`SessionScope`] and runs a
//! single statement (two for cleanup) in one transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::Any;
use tracing::{debug, info, instrument};

use super::backend::{EncodedTask, ResultBackend};
use super::models::{to_millis, GroupRow, TaskRow};
use super::schema::Statements;
use crate::codec::Serializer;
use crate::config::{Dialect, StoreConfig};
use crate::error::StoreError;
use crate::model::{CleanupReport, GroupMeta, TaskMeta, TaskResult, TaskStatus};
use crate::session::{ConnectionFactory, Engine, Session, SessionManager, SessionScope, SharedSession};

/// Result backend over a SQL database
pub struct DatabaseBackend {
    uri: String,
    dialect: Dialect,
    config: StoreConfig,
    sessions: SessionManager,
    serializer: Arc<dyn Serializer>,
    sql: Arc<Statements>,
}

impl DatabaseBackend {
    /// Create a backend using sqlx's own connection pools
    ///
    /// The configuration is validated here; no connection is opened until the
    /// first operation.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        Self::build(config, SessionManager::default())
    }

    /// Create a backend that opens pools through `factory`
    pub fn with_factory(
        config: StoreConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self, StoreError> {
        Self::build(config, SessionManager::new(factory))
    }

    fn build(config: StoreConfig, sessions: SessionManager) -> Result<Self, StoreError> {
        let (uri, dialect) = config.validate()?;
        let uri = uri.to_string();
        let sql = Arc::new(Statements::new(dialect, &config.tables));
        let serializer = config.serializer.build();

        Ok(Self {
            uri,
            dialect,
            config,
            sessions,
            serializer,
            sql,
        })
    }

    /// Replace the serializer selected by configuration
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    /// Engine for the configured URI, with the result tables created
    pub async fn engine(&self) -> Result<Arc<Engine>, StoreError> {
        let engine = self
            .sessions
            .get_engine(&self.uri, &self.config.engine)
            .await?;
        self.prepare(&engine).await?;
        Ok(engine)
    }

    async fn prepare(&self, engine: &Engine) -> Result<(), StoreError> {
        let sql = &self.sql;
        engine
            .prepare_once(move || async move { sql.create_all(engine.pool()).await })
            .await
    }

    async fn acquire_session(&self) -> Result<SharedSession, StoreError> {
        let (engine, session) = self
            .sessions
            .create_session(
                &self.uri,
                &self.config.engine,
                self.config.short_lived_sessions,
            )
            .await?;
        self.prepare(&engine).await?;
        Ok(session)
    }

    /// Run `op` in a scoped session, retrying transient failures
    async fn run_in_session<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'s> Fn(&'s mut Session) -> BoxFuture<'s, Result<T, StoreError>> + Send + Sync,
    {
        let op = &op;
        self.config
            .retry
            .run(move || async move {
                let shared = self.acquire_session().await?;
                let mut session = shared.lock().await;
                let mut scope = SessionScope::new(&mut *session);
                let outcome = op(scope.session()).await;
                scope.finish(outcome).await
            })
            .await
    }
}

#[async_trait]
impl ResultBackend for DatabaseBackend {
    fn result_expires(&self) -> Duration {
        self.config.result_expires
    }

    #[instrument(skip(self, result, traceback))]
    async fn store_result(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&TaskResult>,
        traceback: Option<&str>,
    ) -> Result<(), StoreError> {
        let task = EncodedTask::new(self.serializer.as_ref(), task_id, status, result, traceback)?;
        let sql = Arc::clone(&self.sql);

        self.run_in_session(move |session| {
            let sql = Arc::clone(&sql);
            let task = task.clone();
            Box::pin(async move {
                sqlx::query(&sql.upsert_task)
                    .bind(task.task_id)
                    .bind(task.status.as_str())
                    .bind(task.result)
                    .bind(task.traceback)
                    .bind(task.date_done.map(to_millis))
                    .execute(session.connection().await?)
                    .await?;
                Ok::<_, StoreError>(())
            })
        })
        .await?;

        debug!(%task_id, %status, "stored task result");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_task_meta(&self, task_id: &str) -> Result<TaskMeta, StoreError> {
        let sql = Arc::clone(&self.sql);
        let id = task_id.to_string();

        let row = self
            .run_in_session(move |session| {
                let sql = Arc::clone(&sql);
                let id = id.clone();
                Box::pin(async move {
                    let row = sqlx::query_as::<Any, TaskRow>(&sql.select_task)
                        .bind(id)
                        .fetch_optional(session.connection().await?)
                        .await?;
                    Ok::<_, StoreError>(row)
                })
            })
            .await?;

        match row {
            Some(row) => row.into_meta(self.serializer.as_ref()),
            None => Ok(TaskMeta::pending(task_id)),
        }
    }

    #[instrument(skip(self))]
    async fn forget(&self, task_id: &str) -> Result<(), StoreError> {
        let sql = Arc::clone(&self.sql);
        let id = task_id.to_string();

        self.run_in_session(move |session| {
            let sql = Arc::clone(&sql);
            let id = id.clone();
            Box::pin(async move {
                sqlx::query(&sql.delete_task)
                    .bind(id)
                    .execute(session.connection().await?)
                    .await?;
                Ok::<_, StoreError>(())
            })
        })
        .await?;

        debug!(%task_id, "forgot task");
        Ok(())
    }

    #[instrument(skip(self, result))]
    async fn save_group(&self, group_id: &str, result: Value) -> Result<Value, StoreError> {
        let blob = self.serializer.serialize(&result)?;
        let sql = Arc::clone(&self.sql);
        let id = group_id.to_string();
        let date_done = to_millis(Utc::now());

        self.run_in_session(move |session| {
            let sql = Arc::clone(&sql);
            let id = id.clone();
            let blob = blob.clone();
            Box::pin(async move {
                sqlx::query(&sql.upsert_group)
                    .bind(id)
                    .bind(blob)
                    .bind(date_done)
                    .execute(session.connection().await?)
                    .await?;
                Ok::<_, StoreError>(())
            })
        })
        .await?;

        debug!(%group_id, "saved group result");
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn get_group_meta(&self, group_id: &str) -> Result<Option<GroupMeta>, StoreError> {
        let sql = Arc::clone(&self.sql);
        let id = group_id.to_string();

        let row = self
            .run_in_session(move |session| {
                let sql = Arc::clone(&sql);
                let id = id.clone();
                Box::pin(async move {
                    let row = sqlx::query_as::<Any, GroupRow>(&sql.select_group)
                        .bind(id)
                        .fetch_optional(session.connection().await?)
                        .await?;
                    Ok::<_, StoreError>(row)
                })
            })
            .await?;

        row.map(|row| row.into_meta(self.serializer.as_ref()))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn delete_group(&self, group_id: &str) -> Result<(), StoreError> {
        let sql = Arc::clone(&self.sql);
        let id = group_id.to_string();

        self.run_in_session(move |session| {
            let sql = Arc::clone(&sql);
            let id = id.clone();
            Box::pin(async move {
                sqlx::query(&sql.delete_group)
                    .bind(id)
                    .execute(session.connection().await?)
                    .await?;
                Ok::<_, StoreError>(())
            })
        })
        .await?;

        debug!(%group_id, "deleted group");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cleanup(&self, retention: Duration) -> Result<CleanupReport, StoreError> {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = to_millis(Utc::now()).saturating_sub(retention_ms);
        let sql = Arc::clone(&self.sql);

        let report = self
            .run_in_session(move |session| {
                let sql = Arc::clone(&sql);
                Box::pin(async move {
                    let tasks = sqlx::query(&sql.expire_tasks)
                        .bind(cutoff)
                        .execute(session.connection().await?)
                        .await?;
                    let groups = sqlx::query(&sql.expire_groups)
                        .bind(cutoff)
                        .execute(session.connection().await?)
                        .await?;
                    Ok::<_, StoreError>(CleanupReport {
                        tasks_deleted: tasks.rows_affected(),
                        groups_deleted: groups.rows_affected(),
                    })
                })
            })
            .await?;

        info!(
            tasks_deleted = report.tasks_deleted,
            groups_deleted = report.groups_deleted,
            "expired results removed"
        );
        Ok(report)
    }

    async fn process_cleanup(&self) -> Result<(), StoreError> {
        self.sessions.dispose().await;
        Ok(())
    }
}

impl std::fmt::Debug for DatabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBackend")
            .field("dialect", &self.dialect)
            .field("tables", &self.config.tables)
            .field("serializer", &self.serializer.content_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::RetryPolicy;
    use crate::session::EngineOptions;
    use sqlx::AnyPool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        async fn open(&self, _: &str, _: &EngineOptions) -> Result<AnyPool, StoreError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Configuration("not in this test".into()))
        }
    }

    #[tokio::test]
    async fn test_empty_uri_fails_without_connecting() {
        let factory = Arc::new(CountingFactory {
            opened: AtomicUsize::new(0),
        });

        for uri in ["", "   "] {
            let err = DatabaseBackend::with_factory(StoreConfig::new(uri), factory.clone())
                .unwrap_err();
            assert!(matches!(err, StoreError::Configuration(_)));
        }

        let err = DatabaseBackend::with_factory(StoreConfig::default(), factory.clone())
            .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));

        let err =
            DatabaseBackend::with_factory(StoreConfig::new("mysql://localhost/db"), factory.clone())
                .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));

        assert_eq!(factory.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_cleanup_without_use() {
        let backend = DatabaseBackend::new(StoreConfig::new("sqlite::memory:")).unwrap();
        backend.process_cleanup().await.unwrap();
        backend.process_cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_factory_errors_propagate_unchanged() {
        let factory = Arc::new(CountingFactory {
            opened: AtomicUsize::new(0),
        });
        let backend =
            DatabaseBackend::with_factory(StoreConfig::new("sqlite::memory:"), factory.clone())
                .unwrap();

        let err = backend.get_status("t1").await.unwrap_err();

        assert!(matches!(err, StoreError::Configuration(msg) if msg == "not in this test"));
        // Not transient, so no retry.
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    }

    struct TimingOutFactory {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for TimingOutFactory {
        async fn open(&self, _: &str, _: &EngineOptions) -> Result<AnyPool, StoreError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_then_surface() {
        let factory = Arc::new(TimingOutFactory {
            opened: AtomicUsize::new(0),
        });
        let config = StoreConfig::new("sqlite::memory:")
            .with_retry(RetryPolicy::no_retry().with_max_retries(4));
        let backend = DatabaseBackend::with_factory(config, factory.clone()).unwrap();

        let err = backend.mark_as_started("t1").await.unwrap_err();

        assert!(matches!(err, StoreError::Database(sqlx::Error::PoolTimedOut)));
        assert_eq!(factory.opened.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_in_memory_sqlite_roundtrip() {
        let config = StoreConfig::new("sqlite::memory:").with_engine_options(EngineOptions {
            max_connections: 1,
            ..Default::default()
        });
        let backend = DatabaseBackend::new(config).unwrap();

        backend.mark_as_done("t1", serde_json::json!(42)).await.unwrap();
        assert_eq!(backend.get_status("t1").await.unwrap(), TaskStatus::Success);
        assert_eq!(
            backend.get_result("t1").await.unwrap(),
            Some(TaskResult::Value(serde_json::json!(42)))
        );
        assert!(backend.engine().await.unwrap().is_prepared());
    }
}
