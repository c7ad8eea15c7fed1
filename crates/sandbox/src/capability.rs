//! Capabilities the processing pool consumes.
//!
//! The pool only ever talks to these traits, so the child-process
//! implementation can be swapped for in-memory fakes in tests.

use std::path::Path;

use aibrush_core::model::ModelKind;
use async_trait::async_trait;

use crate::error::SandboxError;

/// A loaded generative model.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one generation. Returns whether the output was flagged NSFW.
    async fn generate(&mut self, args: &serde_json::Value) -> Result<bool, SandboxError>;

    /// Release the model. Must not leave a process behind.
    async fn terminate(&mut self);
}

/// Secondary model scoring how well an image matches a text.
#[async_trait]
pub trait Ranker: Send + Sync {
    /// Similarity in `[-1, 1]`.
    async fn rank(&mut self, text: &str, image_path: &Path) -> Result<f32, SandboxError>;

    async fn terminate(&mut self) {}
}

/// Creates the models a processing worker needs.
///
/// Called only by the worker that will own the result.
pub trait ComputeFactory: Send + Sync {
    fn generator(&self, model: ModelKind) -> Result<Box<dyn Generator>, SandboxError>;

    fn ranker(&self) -> Result<Box<dyn Ranker>, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shareable<T: Send + Sync + ?Sized>() {}

    #[test]
    fn boxed_capabilities_can_cross_tasks() {
        shareable::<Box<dyn Generator>>();
        shareable::<Box<dyn Ranker>>();
        shareable::<crate::process::ModelProcess>();
        shareable::<crate::process::ClipProcess>();
    }
}
