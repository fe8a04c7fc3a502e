//! Per-process engine and session cache

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::{AnyPoolFactory, ConnectionFactory, Engine, EngineOptions, Session, SharedSession};
use crate::error::StoreError;

/// Hands out engines and sessions, one set per process
///
/// Pools opened by a parent process are never used by a forked child. The
/// manager remembers the pid it was populated in and compares it on every
/// call; on mismatch it runs [`after_fork`](SessionManager::after_fork)
/// before doing anything else.
pub struct SessionManager {
    factory: Arc<dyn ConnectionFactory>,
    forked: AtomicBool,
    state: Mutex<ManagerState>,
}

struct ManagerState {
    pid: u32,
    engines: HashMap<String, Arc<Engine>>,
    sessions: HashMap<String, SharedSession>,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            pid: std::process::id(),
            engines: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    /// Abandon everything inherited from the parent
    ///
    /// The parent still owns the sockets behind the inherited pools, so they
    /// are leaked rather than closed.
    fn abandon(&mut self) {
        std::mem::forget(std::mem::take(&mut self.sessions));
        std::mem::forget(std::mem::take(&mut self.engines));
        self.pid = std::process::id();
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Arc::new(AnyPoolFactory))
    }
}

impl SessionManager {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            forked: AtomicBool::new(false),
            state: Mutex::new(ManagerState::new()),
        }
    }

    /// Whether a fork has been observed since the manager was created
    pub fn forked(&self) -> bool {
        self.forked.load(Ordering::SeqCst)
    }

    /// Discard cached engines and sessions after a fork
    ///
    /// Runs automatically when a pid change is detected; pools that know they
    /// have just forked can call it directly.
    pub async fn after_fork(&self) {
        let mut state = self.state.lock().await;
        self.reset_after_fork(&mut state);
    }

    fn reset_after_fork(&self, state: &mut ManagerState) {
        info!(
            parent_pid = state.pid,
            pid = std::process::id(),
            engines = state.engines.len(),
            sessions = state.sessions.len(),
            "discarding connections inherited across fork"
        );
        state.abandon();
        self.forked.store(true, Ordering::SeqCst);
    }

    async fn lock_state(&self) -> tokio::sync::MutexGuard<'_, ManagerState> {
        let mut state = self.state.lock().await;
        if state.pid != std::process::id() {
            self.reset_after_fork(&mut state);
        }
        state
    }

    /// Cached engine for `uri`, opening one through the factory if needed
    #[instrument(skip_all)]
    pub async fn get_engine(
        &self,
        uri: &str,
        options: &EngineOptions,
    ) -> Result<Arc<Engine>, StoreError> {
        let mut state = self.lock_state().await;
        self.engine_for(&mut state, uri, options).await
    }

    async fn engine_for(
        &self,
        state: &mut ManagerState,
        uri: &str,
        options: &EngineOptions,
    ) -> Result<Arc<Engine>, StoreError> {
        if let Some(engine) = state.engines.get(uri) {
            return Ok(Arc::clone(engine));
        }

        let pool = self.factory.open(uri, options).await?;
        let engine = Arc::new(Engine::new(uri, pool));
        state.engines.insert(uri.to_string(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Engine and session for one operation on `uri`
    ///
    /// With `short_lived` every call gets a fresh session; otherwise one
    /// session per URI is cached and reused until the process forks.
    #[instrument(skip(self, uri, options))]
    pub async fn create_session(
        &self,
        uri: &str,
        options: &EngineOptions,
        short_lived: bool,
    ) -> Result<(Arc<Engine>, SharedSession), StoreError> {
        let mut state = self.lock_state().await;
        let engine = self.engine_for(&mut state, uri, options).await?;

        if short_lived {
            let session = Arc::new(Mutex::new(Session::new(Arc::clone(&engine))));
            return Ok((engine, session));
        }

        let session = state
            .sessions
            .entry(uri.to_string())
            .or_insert_with(|| {
                debug!("caching long-lived session");
                Arc::new(Mutex::new(Session::new(Arc::clone(&engine))))
            })
            .clone();

        Ok((engine, session))
    }

    /// Close cached engines and drop cached sessions
    ///
    /// Stored data is untouched. Safe to call when nothing has been opened.
    pub async fn dispose(&self) {
        let engines: Vec<Arc<Engine>> = {
            let mut state = self.lock_state().await;
            state.sessions.clear();
            state.engines.drain().map(|(_, engine)| engine).collect()
        };

        for engine in &engines {
            engine.close().await;
        }

        if !engines.is_empty() {
            info!(engines = engines.len(), "disposed engines");
        }
    }

    /// Number of cached engines
    pub async fn engine_count(&self) -> usize {
        self.state.lock().await.engines.len()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("forked", &self.forked())
            .finish_non_exhaustive()
    }
}
