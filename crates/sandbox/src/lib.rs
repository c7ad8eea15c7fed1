//! Process isolation for the generative and ranking models.
//!
//! GPU libraries can crash or wedge the process that hosts them, so each
//! model runs in a long-lived child process. The parent speaks a small
//! line-oriented protocol over the child's stdin/stdout (see
//! [`protocol`]) and treats any exception, protocol violation or child
//! death as a compute fault for the job at hand.

pub mod capability;
pub mod error;
pub mod launcher;
pub mod process;
pub mod protocol;
pub mod registry;

pub use capability::{ComputeFactory, Generator, Ranker};
pub use error::SandboxError;
