//! The coordinator operations the pipeline depends on.

use aibrush_core::job::{Job, JobUpdate};
use aibrush_core::metric::MetricEvent;
use aibrush_core::model::ModelKind;
use async_trait::async_trait;

use crate::error::CoordinatorError;

/// Binary payloads attached to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Image,
    Mask,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Mask => "mask",
        }
    }
}

/// Central job coordinator.
///
/// Implemented over HTTP by [`crate::api::CoordinatorApi`]; stages hold
/// it as `Arc<dyn Coordinator>` so tests can substitute an in-memory fake.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Claim the next job. `None` means no filter: any model assigned to
    /// this worker may be returned.
    async fn claim_job(&self, model: Option<ModelKind>) -> Result<Option<Job>, CoordinatorError>;

    /// Download a payload. `Ok(None)` when the job has no such payload.
    async fn fetch_payload(
        &self,
        job_id: &str,
        kind: PayloadKind,
    ) -> Result<Option<Vec<u8>>, CoordinatorError>;

    /// Report progress or a result for a job.
    async fn update_job(&self, update: &JobUpdate) -> Result<Job, CoordinatorError>;

    async fn push_metrics(&self, batch: &[MetricEvent]) -> Result<(), CoordinatorError>;

    /// Liveness heartbeat for this worker.
    async fn ping(&self) -> Result<(), CoordinatorError>;
}
