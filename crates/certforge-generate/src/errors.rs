use thiserror::Error;

/// Errors emitted by the synthesizer.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The certificate quota cannot be met even with id reuse.
    #[error("generation constraint violation: {0}")]
    ConstraintViolation(String),
}
