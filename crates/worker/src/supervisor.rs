//! Pipeline wiring, startup and graceful shutdown.
//!
//! Every stage runs as its own task and talks to its neighbours only
//! through bounded queues, so a job is owned by exactly one stage at a
//! time. Shutdown stops the producers first (notification channel and
//! poller, via a cancellation token) and then drains each queue in
//! pipeline order by pushing one poison value per consumer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use aibrush_coordinator::notifications::NotificationChannel;
use aibrush_coordinator::Coordinator;
use aibrush_core::job::{Job, JobUpdate};
use aibrush_core::metric::MetricEvent;
use aibrush_sandbox::ComputeFactory;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cleanup::CleanupStage;
use crate::config::WorkerConfig;
use crate::killswitch::KillSwitch;
use crate::metrics::{MetricsAggregator, MetricsHandle};
use crate::poller::{Poller, PollerConfig};
use crate::processor::{Processor, ProcessorContext};
use crate::queue;
use crate::update::UpdateStage;

/// Capacity of the notification mailbox.
pub const MAILBOX_CAPACITY: usize = 1;

/// How long shutdown waits for each stage to finish.
const STAGE_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Supervisor {
    config: WorkerConfig,
    coordinator: Arc<dyn Coordinator>,
    factory: Arc<dyn ComputeFactory>,
    kill_switch: Arc<KillSwitch>,
    notifications: Option<NotificationChannel>,
}

impl Supervisor {
    pub fn new(
        config: WorkerConfig,
        coordinator: Arc<dyn Coordinator>,
        factory: Arc<dyn ComputeFactory>,
        kill_switch: Arc<KillSwitch>,
    ) -> Self {
        Self {
            config,
            coordinator,
            factory,
            kill_switch,
            notifications: None,
        }
    }

    /// Feed the poller from a push channel. Without one the poller
    /// relies on its timer alone.
    pub fn with_notifications(mut self, channel: NotificationChannel) -> Self {
        self.notifications = Some(channel);
        self
    }

    /// Start every stage, wait for `shutdown`, then drain the pipeline.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let config = &self.config;
        let pool_size = config.pool_size;

        let (work_tx, work_rx) = queue::channel::<Job>("work", config.queue_capacity);
        let (update_tx, update_rx) = queue::channel::<JobUpdate>("updates", config.queue_capacity);
        let (cleanup_tx, cleanup_rx) = queue::channel::<String>("cleanup", config.queue_capacity);
        let (metrics_tx, metrics_rx) =
            queue::channel::<MetricEvent>("metrics", config.queue_capacity);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (warmup_tx, warmup_rx) = mpsc::channel(1);
        let metrics = MetricsHandle::new(metrics_tx.clone());
        let cancel = CancellationToken::new();

        // --- Consumers, last stage first ---
        let metrics_task = tokio::spawn(
            MetricsAggregator::new(
                Arc::clone(&self.coordinator),
                Arc::clone(&self.kill_switch),
                config.metrics_flush_interval,
            )
            .run(metrics_rx),
        );

        let cleanup_task = tokio::spawn(
            CleanupStage::new(config.work_dir.clone(), config.cleanup_max_age).run(cleanup_rx),
        );

        let update_task = tokio::spawn(
            UpdateStage::new(
                Arc::clone(&self.coordinator),
                Arc::clone(&self.kill_switch),
                cleanup_tx.clone(),
                metrics.clone(),
            )
            .run(update_rx),
        );

        let ctx = Arc::new(ProcessorContext {
            factory: Arc::clone(&self.factory),
            kill_switch: Arc::clone(&self.kill_switch),
            updates: update_tx.clone(),
            warmups: warmup_tx,
            metrics: metrics.clone(),
            work_dir: config.work_dir.clone(),
            enable_ranking: config.enable_ranking,
        });
        let pool: Vec<JoinHandle<()>> = (0..pool_size)
            .map(|index| tokio::spawn(Processor::new(index, Arc::clone(&ctx)).run(work_rx.clone())))
            .collect();
        drop(ctx);
        drop(work_rx);

        // --- Producers ---
        let notification_task = match self.notifications {
            Some(channel) => {
                let cancel = cancel.clone();
                Some(tokio::spawn(async move { channel.run(mailbox_tx, cancel).await }))
            }
            None => {
                drop(mailbox_tx);
                None
            }
        };

        let poller_task = tokio::spawn(
            Poller::new(
                Arc::clone(&self.coordinator),
                Arc::clone(&self.kill_switch),
                work_tx.clone(),
                update_tx.clone(),
                mailbox_rx,
                warmup_rx,
                metrics,
                PollerConfig::from_config(config),
            )
            .run(cancel.clone()),
        );

        tracing::info!(
            pool_size,
            queue_capacity = config.queue_capacity,
            model = %config.initial_model,
            "Worker pipeline started",
        );

        shutdown.await;
        tracing::info!("Shutting down worker pipeline");

        // --- Shutdown, in pipeline order ---
        cancel.cancel();
        join("poller", poller_task).await;
        if let Some(task) = notification_task {
            join("notifications", task).await;
        }

        work_tx.poison(pool_size).await;
        for task in pool {
            join("processor", task).await;
        }

        update_tx.poison(1).await;
        join("update", update_task).await;

        cleanup_tx.poison(1).await;
        join("cleanup", cleanup_task).await;

        metrics_tx.poison(1).await;
        join("metrics", metrics_task).await;

        tracing::info!("Worker pipeline stopped");
    }
}

async fn join(stage: &'static str, task: JoinHandle<()>) {
    match tokio::time::timeout(STAGE_JOIN_TIMEOUT, task).await {
        Ok(Ok(())) => tracing::debug!(stage, "Stage stopped"),
        Ok(Err(e)) => tracing::error!(stage, error = %e, "Stage task failed"),
        Err(_) => tracing::warn!(stage, timeout_secs = STAGE_JOIN_TIMEOUT.as_secs(), "Stage did not stop in time"),
    }
}
