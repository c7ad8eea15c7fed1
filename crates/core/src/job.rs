//! Job model and status state machine.
//!
//! A [`Job`] is claimed from the coordinator (or synthesized as a warmup),
//! mutated by exactly one processing worker, and reported back through
//! [`JobUpdate`] records. Status only ever moves forward:
//!
//! ```text
//! Pending -> Processing -> Completed
//!                      \-> Error
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::ModelKind;

/// Default img2img strength when the coordinator omits it.
pub const DEFAULT_STRENGTH: f64 = 0.75;

/// Prompt used for synthetic warmup jobs.
pub const WARMUP_PROMPT: &str = "a cat";

const WARMUP_SIZE: u32 = 512;
const WARMUP_ITERATIONS: u32 = 10;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Terminal statuses leave files behind in transient storage: the
    /// output image on success, the init / mask inputs on failure.
    pub fn leaves_artifacts(&self) -> bool {
        self.is_terminal()
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    /// Forward-only transitions. Repeated `Processing` updates are allowed,
    /// nothing leaves a terminal status.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Unit of work claimed from the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub model: ModelKind,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub negative_phrases: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub iterations: u32,
    /// Inherited from the parent image; OR-ed with the sandbox verdict.
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub negative_score: f64,
    /// Synthetic job that is never reported to the coordinator.
    #[serde(default)]
    pub warmup: bool,
    #[serde(default = "default_strength")]
    pub stable_diffusion_strength: f64,
    /// Init image, fetched lazily by the poller.
    #[serde(skip)]
    pub image_data: Option<Vec<u8>>,
    /// Inpainting mask, fetched lazily by the poller.
    #[serde(skip)]
    pub mask_data: Option<Vec<u8>>,
}

fn default_strength() -> f64 {
    DEFAULT_STRENGTH
}

impl Job {
    /// Build a synthetic warmup job for `model` with a fresh id.
    pub fn warmup(model: ModelKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model,
            phrases: vec![WARMUP_PROMPT.to_string()],
            negative_phrases: Vec::new(),
            width: WARMUP_SIZE,
            height: WARMUP_SIZE,
            iterations: WARMUP_ITERATIONS,
            nsfw: false,
            status: JobStatus::Pending,
            score: 0.0,
            negative_score: 0.0,
            warmup: true,
            stable_diffusion_strength: DEFAULT_STRENGTH,
            image_data: None,
            mask_data: None,
        }
    }

    /// Reject jobs the sandbox could never run.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Validation("Job id must not be empty".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::Validation(format!(
                "Job {} has non-positive dimensions {}x{}",
                self.id, self.width, self.height
            )));
        }
        if self.iterations == 0 {
            return Err(CoreError::Validation(format!(
                "Job {} has zero iterations",
                self.id
            )));
        }
        Ok(())
    }

    /// Move to `next`, enforcing the forward-only state machine.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Positive prompt as sent to ranking (`|`-separated).
    pub fn prompt(&self) -> String {
        self.phrases.join("|")
    }

    /// Negative prompt, or `None` when there is nothing to rank against.
    pub fn negative_prompt(&self) -> Option<String> {
        let joined = self.negative_phrases.join("|");
        let trimmed = joined.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

// ---------------------------------------------------------------------------
// JobUpdate
// ---------------------------------------------------------------------------

/// Result record pushed to the coordinator's update endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    #[serde(skip_serializing)]
    pub id: String,
    /// Base64-encoded output image, if one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    pub iterations: u32,
    pub status: JobStatus,
    pub score: f64,
    pub negative_score: f64,
    pub nsfw: bool,
}

impl JobUpdate {
    /// Snapshot of the job's current state, without image data.
    pub fn from_job(job: &Job, iterations: u32) -> Self {
        Self {
            id: job.id.clone(),
            image_data: None,
            iterations,
            status: job.status,
            score: job.score,
            negative_score: job.negative_score,
            nsfw: job.nsfw,
        }
    }

    pub fn with_image_data(mut self, encoded: String) -> Self {
        self.image_data = Some(encoded);
        self
    }
}
