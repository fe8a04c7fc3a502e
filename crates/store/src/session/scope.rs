//! Sessions and the guard that scopes one unit of work

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Any, AnyConnection, Transaction};
use tracing::warn;
use uuid::Uuid;

use super::Engine;
use crate::error::StoreError;

/// Transaction control used by [`SessionScope`]
#[async_trait]
pub trait ManagedSession: Send {
    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Release the connection; an open transaction is rolled back
    fn close(&mut self);
}

/// One unit of work over a pooled connection
///
/// A transaction is begun lazily by [`Session::connection`] and ends with
/// `commit`, `rollback` or `close`. The session itself can be reused after
/// that; the next `connection` call begins a new transaction.
pub struct Session {
    id: Uuid,
    engine: Arc<Engine>,
    tx: Option<Transaction<'static, Any>>,
}

/// A session shared between calls on the same URI
pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

impl Session {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            id: Uuid::now_v7(),
            engine,
            tx: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Connection inside this session's transaction, beginning one if needed
    pub async fn connection(&mut self) -> Result<&mut AnyConnection, StoreError> {
        let tx = match &mut self.tx {
            Some(tx) => tx,
            slot => slot.insert(self.engine.pool().begin().await?),
        };
        Ok(&mut **tx)
    }
}

#[async_trait]
impl ManagedSession for Session {
    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the transaction queues a rollback and returns the
        // connection to the pool.
        self.tx = None;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("engine", &self.engine.id())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

/// Scopes a session to one operation
///
/// [`finish`](SessionScope::finish) commits and closes on success, or rolls
/// back and closes on error. A scope dropped before finishing (early return,
/// panic, cancelled future) only closes, which discards any open
/// transaction.
pub struct SessionScope<'s, S: ManagedSession> {
    session: &'s mut S,
    finished: bool,
}

impl<'s, S: ManagedSession> SessionScope<'s, S> {
    pub fn new(session: &'s mut S) -> Self {
        Self {
            session,
            finished: false,
        }
    }

    pub fn session(&mut self) -> &mut S {
        self.session
    }

    /// End the scope with the outcome of the work done in it
    ///
    /// The operation's own error wins over a failed rollback, which is only
    /// logged. A failed commit is returned as the error.
    pub async fn finish<T>(mut self, outcome: Result<T, StoreError>) -> Result<T, StoreError> {
        let result = match outcome {
            Ok(value) => {
                let committed = self.session.commit().await;
                self.session.close();
                committed.map(|()| value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.session.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                self.session.close();
                Err(err)
            }
        };
        self.finished = true;
        result
    }
}

impl<S: ManagedSession> Drop for SessionScope<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records the order of transaction calls
    #[derive(Default)]
    struct RecordingSession {
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail_commit: bool,
        fail_rollback: bool,
    }

    impl RecordingSession {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ManagedSession for RecordingSession {
        async fn commit(&mut self) -> Result<(), StoreError> {
            self.calls.lock().push("commit");
            if self.fail_commit {
                return Err(StoreError::Configuration("commit failed".into()));
            }
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), StoreError> {
            self.calls.lock().push("rollback");
            if self.fail_rollback {
                return Err(StoreError::Configuration("rollback failed".into()));
            }
            Ok(())
        }

        fn close(&mut self) {
            self.calls.lock().push("close");
        }
    }

    #[tokio::test]
    async fn test_success_commits_then_closes() {
        let mut session = RecordingSession::default();
        let scope = SessionScope::new(&mut session);

        let value = scope.finish(Ok(42)).await.unwrap();

        assert_eq!(value, 42);
        assert_eq!(session.calls(), vec!["commit", "close"]);
    }

    #[tokio::test]
    async fn test_error_rolls_back_then_closes() {
        let mut session = RecordingSession::default();
        let scope = SessionScope::new(&mut session);

        let err = scope
            .finish::<()>(Err(StoreError::CorruptRecord("bad".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::CorruptRecord(_)));
        assert_eq!(session.calls(), vec!["rollback", "close"]);
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_original_error() {
        let mut session = RecordingSession {
            fail_rollback: true,
            ..Default::default()
        };
        let scope = SessionScope::new(&mut session);

        let err = scope
            .finish::<()>(Err(StoreError::CorruptRecord("bad".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::CorruptRecord(_)));
        assert_eq!(session.calls(), vec!["rollback", "close"]);
    }

    #[tokio::test]
    async fn test_commit_failure_is_returned() {
        let mut session = RecordingSession {
            fail_commit: true,
            ..Default::default()
        };
        let scope = SessionScope::new(&mut session);

        let err = scope.finish(Ok(1)).await.unwrap_err();

        assert!(matches!(err, StoreError::Configuration(_)));
        assert_eq!(session.calls(), vec!["commit", "close"]);
    }

    #[tokio::test]
    async fn test_drop_without_finish_closes() {
        let mut session = RecordingSession::default();
        {
            let mut scope = SessionScope::new(&mut session);
            let _ = scope.session();
        }
        assert_eq!(session.calls(), vec!["close"]);
    }

    #[tokio::test]
    async fn test_session_transaction_lifecycle() {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let mut session = Session::new(Arc::new(Engine::new("sqlite::memory:", pool)));

        assert!(!session.in_transaction());
        sqlx::query("CREATE TABLE t (v INTEGER)")
            .execute(session.connection().await.unwrap())
            .await
            .unwrap();
        assert!(session.in_transaction());

        session.commit().await.unwrap();
        assert!(!session.in_transaction());

        sqlx::query("INSERT INTO t (v) VALUES (1)")
            .execute(session.connection().await.unwrap())
            .await
            .unwrap();
        session.rollback().await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
            .fetch_one(session.connection().await.unwrap())
            .await
            .unwrap();
        assert_eq!(count, 0);
        session.close();
        assert!(!session.in_transaction());
    }
}
