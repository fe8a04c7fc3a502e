//! Engines and the factory that opens them

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;

/// Pool settings for an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

impl EngineOptions {
    /// Options to actually open `uri` with
    ///
    /// An in-memory SQLite database lives only as long as its connection, so
    /// those URIs get a single connection that is never reaped or recycled.
    pub fn for_uri(&self, uri: &str) -> Self {
        if is_sqlite_memory(uri) {
            Self {
                max_connections: 1,
                min_connections: 1,
                idle_timeout: None,
                max_lifetime: None,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }
}

fn is_sqlite_memory(uri: &str) -> bool {
    uri.starts_with("sqlite:") && (uri.contains(":memory:") || uri.contains("mode=memory"))
}

/// Opens connection pools
///
/// Called at most once per URI per process lifetime; the session manager
/// caches what it returns until the process forks.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn open(&self, uri: &str, options: &EngineOptions) -> Result<AnyPool, StoreError>;
}

/// Factory backed by sqlx's driver-neutral pool
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyPoolFactory;

#[async_trait]
impl ConnectionFactory for AnyPoolFactory {
    async fn open(&self, uri: &str, options: &EngineOptions) -> Result<AnyPool, StoreError> {
        sqlx::any::install_default_drivers();
        let options = options.for_uri(uri);

        let pool = AnyPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(options.idle_timeout)
            .max_lifetime(options.max_lifetime)
            .connect(uri)
            .await?;

        Ok(pool)
    }
}

/// A connection pool bound to one URI in one process
pub struct Engine {
    id: Uuid,
    uri: String,
    pid: u32,
    pool: AnyPool,
    schema: OnceCell<()>,
}

impl Engine {
    pub(crate) fn new(uri: impl Into<String>, pool: AnyPool) -> Self {
        let engine = Self {
            id: Uuid::now_v7(),
            uri: uri.into(),
            pid: std::process::id(),
            pool,
            schema: OnceCell::new(),
        };
        info!(engine_id = %engine.id, pid = engine.pid, "engine created");
        engine
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Process that opened the pool
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Whether the one-time schema setup has completed on this engine
    pub fn is_prepared(&self) -> bool {
        self.schema.initialized()
    }

    /// Run `init` the first time it is called on this engine
    ///
    /// Concurrent callers wait for the first one; a failed `init` leaves the
    /// engine unprepared so the next call tries again.
    pub async fn prepare_once<F, Fut>(&self, init: F) -> Result<(), StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        self.schema.get_or_try_init(init).await.map(|_| ())
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("prepared", &self.is_prepared())
            .finish_non_exhaustive()
    }
}
