//! Reliability patterns for reconciliation commits.
//!
//! Commit races between concurrent reconciliations of the same user surface
//! as [`ReconcileError::PersistenceConflict`](crate::error::ReconcileError);
//! this module provides the bounded exponential-backoff retry used to
//! resolve them.

mod retry;

pub use retry::{RetryPolicy, is_retryable, retry_with_backoff};
