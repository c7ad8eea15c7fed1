use aibrush_core::error::{Classify, ErrorClass};

/// Errors raised by a sandboxed model.
///
/// Every variant is a compute fault from the job's point of view: the
/// job is reported as `error` and the owning worker discards the child.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The child process could not be started at all.
    #[error("Failed to spawn sandbox '{label}': {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to the child's pipes failed.
    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request could not be serialized to a JSON line.
    #[error("Failed to encode sandbox request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The child reported `EXCEPTION`.
    #[error("Exception in sandbox '{0}'")]
    ComputeFault(String),

    /// The child closed stdout before emitting a terminal line.
    #[error("Sandbox '{0}' exited before a terminal line")]
    ChildExited(String),

    /// The child emitted something the parent could not interpret.
    #[error("Sandbox protocol violation: {0}")]
    Protocol(String),
}

impl Classify for SandboxError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}
