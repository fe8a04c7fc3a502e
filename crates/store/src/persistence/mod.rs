//! Persistence layer for task and group results
//!
//! This module provides:
//! - [`ResultBackend`] trait with the full read/write contract
//! - [`DatabaseBackend`] for SQLite and PostgreSQL
//! - [`InMemoryBackend`] for testing

mod backend;
mod database;
mod memory;
mod models;
mod schema;

pub use backend::{ResultBackend, MIN_POLL_INTERVAL};
pub use database::DatabaseBackend;
pub use memory::InMemoryBackend;
