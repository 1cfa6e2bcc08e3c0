//! Load state machine: append or atomically replace a table's rows.

pub mod reconciler;
pub mod retry;

pub use reconciler::{staging_table, LoadError, LoadReconciler, LoadResult, LoadState, StagingCleanups};
pub use retry::{with_retry, RetryPolicy, Retryable};
