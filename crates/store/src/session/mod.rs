//! Connection and session management
//!
//! ```text
//! SessionManager (one per process)
//!   ├── engines:  uri ──► Arc<Engine>      (pool, opened by ConnectionFactory)
//!   └── sessions: uri ──► SharedSession    (long-lived mode only)
//!
//! operation ──► SessionScope ──► Session ──► Transaction ──► pooled connection
//! ```
//!
//! URIs are never logged; they usually carry credentials.

mod engine;
mod manager;
mod scope;

pub use engine::{AnyPoolFactory, ConnectionFactory, Engine, EngineOptions};
pub use manager::SessionManager;
pub use scope::{ManagedSession, Session, SessionScope, SharedSession};
