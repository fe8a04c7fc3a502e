//! Reliability patterns for storage operations
//!
//! This module provides:
//! - [`RetryPolicy`] - Bounded linear backoff around a fallible async operation
//! - [`Retryable`] - Classification of errors worth retrying

mod retry;

pub use retry::{RetryPolicy, Retryable};
