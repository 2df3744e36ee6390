use std::time::Duration;

use thiserror::Error;

/// Errors emitted by the streaming store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("batch write timed out after {0:?}")]
    Timeout(Duration),
    #[error("batch write failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl StoreError {
    /// Transient failures are retried with backoff before escalating.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Db(_) | Self::Timeout(_))
    }
}
