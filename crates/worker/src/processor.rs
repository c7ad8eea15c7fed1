//! Processing pool workers.
//!
//! Each [`Processor`] owns at most one loaded generator and one ranker.
//! Nothing outside the worker touches them: a model switch or a compute
//! fault tears the generator down and the next job that needs it loads a
//! fresh one through the [`ComputeFactory`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use aibrush_core::job::{Job, JobStatus, JobUpdate};
use aibrush_core::metric::MetricEvent;
use aibrush_core::metric_names::{
    ATTR_DURATION_SECONDS, ATTR_MODEL, ATTR_NSFW, ATTR_STATUS, METRIC_PROCESS,
};
use aibrush_core::model::ModelKind;
use aibrush_sandbox::{ComputeFactory, Generator, Ranker, SandboxError};
use base64::prelude::*;
use tokio::sync::mpsc;

use crate::args;
use crate::cleanup;
use crate::error::WorkerError;
use crate::killswitch::KillSwitch;
use crate::metrics::MetricsHandle;
use crate::output;
use crate::queue::{Inbox, Outbox};

/// Result of a warmup job, handed back to the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupOutcome {
    pub job_id: String,
    pub model: ModelKind,
    pub succeeded: bool,
}

/// Collaborators shared by every worker in the pool.
pub struct ProcessorContext {
    pub factory: Arc<dyn ComputeFactory>,
    pub kill_switch: Arc<KillSwitch>,
    pub updates: Outbox<JobUpdate>,
    pub warmups: mpsc::Sender<WarmupOutcome>,
    pub metrics: MetricsHandle,
    pub work_dir: PathBuf,
    pub enable_ranking: bool,
}

pub struct Processor {
    index: usize,
    ctx: Arc<ProcessorContext>,
    generator: Option<(ModelKind, Box<dyn Generator>)>,
    ranker: Option<Box<dyn Ranker>>,
}

impl Processor {
    pub fn new(index: usize, ctx: Arc<ProcessorContext>) -> Self {
        Self {
            index,
            ctx,
            generator: None,
            ranker: None,
        }
    }

    pub async fn run(mut self, inbox: Inbox<Job>) {
        tracing::info!(worker = self.index, "Processing worker started");
        while let Some(job) = inbox.recv().await {
            self.process(job).await;
        }
        self.teardown().await;
        tracing::info!(worker = self.index, "Processing worker stopped");
    }

    /// Run one job end to end.
    pub async fn process(&mut self, mut job: Job) {
        if job.warmup {
            self.process_warmup(job).await;
            return;
        }

        let started = Instant::now();
        if let Err(e) = job.advance(JobStatus::Processing) {
            tracing::error!(job_id = %job.id, error = %e, "Refusing to process job");
            self.ctx.kill_switch.record_error();
            return;
        }
        self.send_update(JobUpdate::from_job(&job, job.iterations)).await;

        let update = match self.execute(&mut job).await {
            Ok(image) => {
                self.finish(&mut job, JobStatus::Completed);
                tracing::info!(
                    worker = self.index,
                    job_id = %job.id,
                    model = %job.model,
                    nsfw = job.nsfw,
                    score = job.score,
                    "Job completed",
                );
                let update = JobUpdate::from_job(&job, job.iterations);
                match image {
                    Some(encoded) => update.with_image_data(encoded),
                    None => update,
                }
            }
            Err(e) => {
                tracing::error!(worker = self.index, job_id = %job.id, error = %e, "Job failed");
                self.ctx.kill_switch.record_error();
                self.finish(&mut job, JobStatus::Error);
                JobUpdate::from_job(&job, job.iterations)
            }
        };
        let status = update.status;
        self.send_update(update).await;

        self.ctx
            .metrics
            .emit(
                MetricEvent::count(METRIC_PROCESS)
                    .with_attribute(ATTR_DURATION_SECONDS, started.elapsed().as_secs_f64())
                    .with_attribute(ATTR_MODEL, job.model.as_str())
                    .with_attribute(ATTR_NSFW, job.nsfw)
                    .with_attribute(ATTR_STATUS, status.as_str()),
            )
            .await;
    }

    /// Warmups never reach the update stage. Their outcome, success or
    /// not, releases the poller.
    async fn process_warmup(&mut self, mut job: Job) {
        let succeeded = match self.execute(&mut job).await {
            Ok(_) => {
                tracing::info!(worker = self.index, model = %job.model, "Sandbox warmed up");
                true
            }
            Err(e) => {
                tracing::error!(worker = self.index, model = %job.model, error = %e, "Warmup failed");
                self.ctx.kill_switch.record_error();
                false
            }
        };

        cleanup::sweep(&self.ctx.work_dir, &job.id, None).await;

        let outcome = WarmupOutcome {
            job_id: job.id,
            model: job.model,
            succeeded,
        };
        if self.ctx.warmups.send(outcome).await.is_err() {
            tracing::debug!("Poller no longer waiting for warmup");
        }
    }

    /// Generate, rank and encode. Returns the base64 output image for
    /// real jobs, `None` for warmups.
    async fn execute(&mut self, job: &mut Job) -> Result<Option<String>, WorkerError> {
        let prepared = args::prepare(job, &self.ctx.work_dir).await?;
        let flagged = self.generate(job.model, &prepared.args).await?;
        job.nsfw = job.nsfw || flagged;

        if job.warmup {
            return Ok(None);
        }

        output::finalize(job, &prepared.output).await?;

        if self.ctx.enable_ranking {
            let (score, negative_score) = self.rank(job, &prepared.output).await?;
            job.score = score;
            job.negative_score = negative_score;
        }

        let image = tokio::fs::read(&prepared.output).await?;
        Ok(Some(BASE64_STANDARD.encode(image)))
    }

    async fn generate(
        &mut self,
        model: ModelKind,
        args: &serde_json::Value,
    ) -> Result<bool, SandboxError> {
        let mut generator = match self.generator.take() {
            Some((loaded, generator)) if loaded == model => generator,
            previous => {
                if let Some((loaded, mut old)) = previous {
                    tracing::info!(worker = self.index, from = %loaded, to = %model, "Switching model");
                    old.terminate().await;
                }
                self.ctx.factory.generator(model)?
            }
        };

        match generator.generate(args).await {
            Ok(flagged) => {
                self.generator = Some((model, generator));
                Ok(flagged)
            }
            Err(e) => {
                // Next job for this model starts from a fresh child.
                generator.terminate().await;
                Err(e)
            }
        }
    }

    async fn rank(&mut self, job: &Job, output: &Path) -> Result<(f64, f64), SandboxError> {
        let mut ranker = match self.ranker.take() {
            Some(ranker) => ranker,
            None => self.ctx.factory.ranker()?,
        };

        match rank_job(ranker.as_mut(), job, output).await {
            Ok(scores) => {
                self.ranker = Some(ranker);
                Ok(scores)
            }
            Err(e) => {
                ranker.terminate().await;
                Err(e)
            }
        }
    }

    fn finish(&self, job: &mut Job, status: JobStatus) {
        if let Err(e) = job.advance(status) {
            tracing::warn!(job_id = %job.id, error = %e, "Unexpected status transition");
        }
    }

    async fn send_update(&self, update: JobUpdate) {
        if let Err(e) = self.ctx.updates.send(update).await {
            tracing::error!(worker = self.index, error = %e, "Update queue closed");
        }
    }

    async fn teardown(&mut self) {
        if let Some((_, mut generator)) = self.generator.take() {
            generator.terminate().await;
        }
        if let Some(mut ranker) = self.ranker.take() {
            ranker.terminate().await;
        }
    }
}

/// Score `output` against the positive prompt and, when there is one,
/// the negative prompt.
async fn rank_job(ranker: &mut dyn Ranker, job: &Job, output: &Path) -> Result<(f64, f64), SandboxError> {
    let score = ranker.rank(&job.prompt(), output).await?;
    let negative_score = match job.negative_prompt() {
        Some(negative) => ranker.rank(&negative, output).await?,
        None => 0.0,
    };
    Ok((f64::from(score), f64::from(negative_score)))
}
