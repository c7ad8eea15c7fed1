//! Job acquisition.
//!
//! The poller merges push hints from the notification channel with its
//! own timer and claims jobs for the model it is currently sticky on.
//! Each cycle moves through four steps:
//!
//! 1. wait briefly for a hint (longer after an empty claim),
//! 2. claim, either filtered by the sticky model or, when the assignment
//!    check is due, unfiltered after a liveness ping,
//! 3. fetch the job's payloads,
//! 4. push it to the processing pool, blocking while the pool is busy.
//!
//! A change of model gets a synthetic warmup first, and every warmup is
//! held until the pool reports back so a freshly loaded sandbox is proven
//! before real traffic reaches it.
//!
//! Once a job is claimed the coordinator considers it taken, so a job
//! that fails validation or payload download is reported as `error`
//! through the update queue rather than dropped.

use std::sync::Arc;
use std::time::Duration;

use aibrush_coordinator::backoff::{Backoff, BackoffConfig};
use aibrush_coordinator::messages::Notification;
use aibrush_coordinator::{Coordinator, PayloadKind};
use aibrush_core::error::Classify;
use aibrush_core::job::{Job, JobStatus, JobUpdate};
use aibrush_core::metric::MetricEvent;
use aibrush_core::metric_names::{ATTR_DURATION_SECONDS, ATTR_MODEL, METRIC_POLL};
use aibrush_core::model::ModelKind;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::killswitch::KillSwitch;
use crate::metrics::MetricsHandle;
use crate::processor::WarmupOutcome;
use crate::queue::Outbox;

/// How long a cycle waits for a hint after a successful claim.
pub const SIGNAL_WAIT: Duration = Duration::from_millis(100);

/// Upper bound of the random delay before claiming on a pending-job hint.
pub const MAX_JITTER_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Period of the liveness ping and unfiltered claim.
    pub poll_interval: Duration,
    /// First wait after an empty claim.
    pub initial_backoff: Duration,
    /// Longest wait between empty claims.
    pub max_backoff: Duration,
    pub initial_model: ModelKind,
}

impl PollerConfig {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            initial_backoff: Duration::from_secs(1).min(config.max_poll_backoff),
            max_backoff: config.max_poll_backoff,
            initial_model: config.initial_model,
        }
    }
}

pub struct Poller {
    coordinator: Arc<dyn Coordinator>,
    kill_switch: Arc<KillSwitch>,
    work: Outbox<Job>,
    updates: Outbox<JobUpdate>,
    mailbox: mpsc::Receiver<Notification>,
    warmups: mpsc::Receiver<WarmupOutcome>,
    metrics: MetricsHandle,
    config: PollerConfig,
    model: ModelKind,
    backoff: Backoff,
    idle: Duration,
    last_check: Option<Instant>,
}

impl Poller {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        kill_switch: Arc<KillSwitch>,
        work: Outbox<Job>,
        updates: Outbox<JobUpdate>,
        mailbox: mpsc::Receiver<Notification>,
        warmups: mpsc::Receiver<WarmupOutcome>,
        metrics: MetricsHandle,
        config: PollerConfig,
    ) -> Self {
        let backoff = Backoff::new(BackoffConfig {
            initial_delay: config.initial_backoff,
            max_delay: config.max_backoff,
            multiplier: 2.0,
        });
        Self {
            coordinator,
            kill_switch,
            work,
            updates,
            mailbox,
            warmups,
            metrics,
            model: config.initial_model,
            config,
            backoff,
            idle: SIGNAL_WAIT,
            last_check: None,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(model = %self.model, "Job poller started");

        if self.model.supports_synthetic_warmup() {
            if let Err(e) = self.warm_up(&cancel).await {
                tracing::error!(error = %e, "Startup warmup failed");
                self.kill_switch.record_error();
            }
        }

        while !cancel.is_cancelled() {
            if let Err(e) = self.cycle(&cancel).await {
                let class = e.class();
                tracing::error!(error = %e, ?class, "Poll cycle failed");
                self.kill_switch.record_error();
                if class.is_transient() {
                    self.idle = self.backoff.next_delay();
                }
            }
        }

        tracing::info!("Job poller stopped");
    }

    /// One pass through the poller's state machine.
    pub async fn cycle(&mut self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        // Awaiting signal.
        let hint = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            hint = self.next_hint() => hint,
        };

        if hint == Some(Notification::PendingJob) {
            let jitter = Duration::from_millis(rand::random_range(0..=MAX_JITTER_MS));
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(jitter) => {}
            }
        }

        // Claiming.
        let started = Instant::now();
        let check_due = self
            .last_check
            .map_or(true, |at| at.elapsed() >= self.config.poll_interval);
        let claimed = if hint == Some(Notification::ConfigUpdated) || check_due {
            self.check_assignment().await?
        } else {
            self.coordinator.claim_job(Some(self.model)).await?
        };

        let Some(mut job) = claimed else {
            self.idle = self.backoff.next_delay();
            tracing::debug!(model = %self.model, retry_ms = self.idle.as_millis() as u64, "No job available");
            return Ok(());
        };
        self.backoff.reset();
        self.idle = SIGNAL_WAIT;

        self.metrics
            .emit(
                MetricEvent::count(METRIC_POLL)
                    .with_attribute(ATTR_DURATION_SECONDS, started.elapsed().as_secs_f64())
                    .with_attribute(ATTR_MODEL, job.model.as_str()),
            )
            .await;
        tracing::info!(job_id = %job.id, model = %job.model, warmup = job.warmup, "Job claimed");

        if let Err(e) = job.validate() {
            return self.reject(job, e.into()).await;
        }
        if job.model != self.model {
            self.switch_model(job.model, cancel).await?;
        }

        // Fetching payload.
        if !job.warmup {
            if let Err(e) = self.fetch_payloads(&mut job).await {
                return self.reject(job, e).await;
            }
        }

        // Dispatching.
        self.dispatch(job, cancel).await
    }

    /// Wait up to the current idle period for a hint. Falls back to a
    /// plain sleep once the notification channel has gone away.
    async fn next_hint(&mut self) -> Option<Notification> {
        let deadline = Instant::now() + self.idle;
        match tokio::time::timeout_at(deadline, self.mailbox.recv()).await {
            Ok(Some(notification)) => Some(notification),
            Ok(None) => {
                tokio::time::sleep_until(deadline).await;
                None
            }
            Err(_) => None,
        }
    }

    /// Liveness ping followed by an unfiltered claim.
    async fn check_assignment(&mut self) -> Result<Option<Job>, WorkerError> {
        self.last_check = Some(Instant::now());
        self.coordinator.ping().await?;
        Ok(self.coordinator.claim_job(None).await?)
    }

    async fn switch_model(
        &mut self,
        model: ModelKind,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        tracing::info!(from = %self.model, to = %model, "Model assignment changed");
        self.model = model;
        if model.supports_synthetic_warmup() {
            self.warm_up(cancel).await?;
        }
        Ok(())
    }

    async fn warm_up(&mut self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        tracing::info!(model = %self.model, "Dispatching warmup job");
        self.dispatch(Job::warmup(self.model), cancel).await
    }

    async fn fetch_payloads(&self, job: &mut Job) -> Result<(), WorkerError> {
        job.image_data = self
            .coordinator
            .fetch_payload(&job.id, PayloadKind::Image)
            .await?;
        if job.model.requires_mask() {
            job.mask_data = self
                .coordinator
                .fetch_payload(&job.id, PayloadKind::Mask)
                .await?;
        }
        Ok(())
    }

    /// Report a claimed job that never reaches the pool as failed, then
    /// surface `error` to the cycle's caller.
    async fn reject(&self, mut job: Job, error: WorkerError) -> Result<(), WorkerError> {
        tracing::error!(job_id = %job.id, model = %job.model, error = %error, "Claimed job rejected");

        if job.warmup || job.id.trim().is_empty() {
            return Err(error);
        }
        if let Err(e) = job.advance(JobStatus::Error) {
            tracing::warn!(job_id = %job.id, error = %e, "Unexpected status transition");
            return Err(error);
        }
        self.updates.send(JobUpdate::from_job(&job, job.iterations)).await?;
        Err(error)
    }

    async fn dispatch(&mut self, job: Job, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let warmup = job.warmup;
        let job_id = job.id.clone();

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = self.work.send(job) => sent?,
        }
        tracing::debug!(job_id = %job_id, "Job dispatched");

        if warmup {
            self.await_warmup(&job_id, cancel).await?;
        }
        Ok(())
    }

    async fn await_warmup(
        &mut self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                outcome = self.warmups.recv() => outcome.ok_or(WorkerError::QueueClosed("warmups"))?,
            };

            if outcome.job_id != job_id {
                tracing::debug!(job_id = %outcome.job_id, "Ignoring stale warmup outcome");
                continue;
            }
            if outcome.succeeded {
                tracing::info!(model = %outcome.model, "Warmup round-trip complete");
            } else {
                tracing::warn!(model = %outcome.model, "Warmup failed, continuing");
            }
            return Ok(());
        }
    }
}
