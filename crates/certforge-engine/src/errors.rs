use thiserror::Error;

use certforge_generate::SynthesisError;
use certforge_store::StoreError;

/// Errors surfaced by the job facade.
#[derive(Debug, Error)]
pub enum JobError {
    /// Bad request shape; surfaced to the caller, never retried.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// Only one generation job may run per process.
    #[error("a generation job is already running")]
    AlreadyRunning,
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("pipeline worker panicked: {0}")]
    WorkerPanic(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
