//! Reports job outcomes to the coordinator.

use std::sync::Arc;
use std::time::Instant;

use aibrush_coordinator::Coordinator;
use aibrush_core::job::JobUpdate;
use aibrush_core::metric::MetricEvent;
use aibrush_core::metric_names::{ATTR_DURATION_SECONDS, ATTR_STATUS, METRIC_UPDATE};

use crate::killswitch::KillSwitch;
use crate::metrics::MetricsHandle;
use crate::queue::{Inbox, Outbox};

/// Single consumer of the update queue.
///
/// Updates are not retried locally: the coordinator is the source of
/// truth and a lost update leaves the job visibly stuck there. Terminal
/// updates are forwarded to cleanup whether or not the push succeeded.
pub struct UpdateStage {
    coordinator: Arc<dyn Coordinator>,
    kill_switch: Arc<KillSwitch>,
    cleanup: Outbox<String>,
    metrics: MetricsHandle,
}

impl UpdateStage {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        kill_switch: Arc<KillSwitch>,
        cleanup: Outbox<String>,
        metrics: MetricsHandle,
    ) -> Self {
        Self {
            coordinator,
            kill_switch,
            cleanup,
            metrics,
        }
    }

    pub async fn run(self, inbox: Inbox<JobUpdate>) {
        tracing::info!("Update stage started");
        while let Some(update) = inbox.recv().await {
            self.handle(update).await;
        }
        tracing::info!("Update stage stopped");
    }

    async fn handle(&self, update: JobUpdate) {
        let started = Instant::now();
        match self.coordinator.update_job(&update).await {
            Ok(_) => {
                tracing::info!(job_id = %update.id, status = %update.status, "Job updated");
            }
            Err(e) => {
                tracing::error!(job_id = %update.id, status = %update.status, error = %e, "Job update failed");
                self.kill_switch.record_error();
            }
        }

        self.metrics
            .emit(
                MetricEvent::count(METRIC_UPDATE)
                    .with_attribute(ATTR_DURATION_SECONDS, started.elapsed().as_secs_f64())
                    .with_attribute(ATTR_STATUS, update.status.as_str()),
            )
            .await;

        if update.status.leaves_artifacts() {
            if let Err(e) = self.cleanup.send(update.id).await {
                tracing::warn!(error = %e, "Cleanup queue closed");
            }
        }
    }
}
