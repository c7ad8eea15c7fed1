use aibrush_coordinator::CoordinatorError;
use aibrush_core::error::{Classify, CoreError, ErrorClass};
use aibrush_sandbox::SandboxError;

/// Errors raised inside pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("Job {job_id} requires {payload} data but none was provided")]
    MissingPayload {
        job_id: String,
        payload: &'static str,
    },

    #[error("Queue closed: {0}")]
    QueueClosed(&'static str),
}

impl Classify for WorkerError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Coordinator(e) => e.class(),
            _ => ErrorClass::Fatal,
        }
    }
}
