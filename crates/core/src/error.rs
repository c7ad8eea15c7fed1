use crate::job::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

/// How a stage should react to a failure on its next cycle.
///
/// Every stage makes its retry decision from this classification alone,
/// regardless of which collaborator produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connect / timeout / 5xx talking to the coordinator. Back off and retry.
    TransientNetwork,
    /// Anything else. Counted, logged, and the cycle restarts immediately.
    Fatal,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::TransientNetwork)
    }
}

/// Implemented by every error type that crosses a pipeline stage boundary.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl Classify for CoreError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}
