//! Telemetry batching.
//!
//! Stages emit [`MetricEvent`]s through a [`MetricsHandle`]; the
//! [`MetricsAggregator`] buffers them and pushes a batch to the
//! coordinator once the flush interval has elapsed, on a timer tick, and
//! one last time at shutdown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use aibrush_coordinator::Coordinator;
use aibrush_core::metric::MetricEvent;
use tokio::time::Instant;

use crate::killswitch::KillSwitch;
use crate::queue::{Inbox, Outbox};

/// Upper bound on unflushed events; the oldest are dropped beyond this.
pub const MAX_BUFFERED_EVENTS: usize = 1000;

const MIN_TICK: Duration = Duration::from_millis(100);

/// Cheap, cloneable producer handle.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    outbox: Outbox<MetricEvent>,
}

impl MetricsHandle {
    pub fn new(outbox: Outbox<MetricEvent>) -> Self {
        Self { outbox }
    }

    /// Queue an event. Dropped silently once the aggregator has stopped.
    pub async fn emit(&self, event: MetricEvent) {
        if self.outbox.send(event).await.is_err() {
            tracing::debug!("Metrics queue closed, event dropped");
        }
    }
}

pub struct MetricsAggregator {
    coordinator: Arc<dyn Coordinator>,
    kill_switch: Arc<KillSwitch>,
    flush_interval: Duration,
    buffer: VecDeque<MetricEvent>,
    last_flush: Instant,
}

impl MetricsAggregator {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        kill_switch: Arc<KillSwitch>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            kill_switch,
            flush_interval,
            buffer: VecDeque::new(),
            last_flush: Instant::now(),
        }
    }

    pub async fn run(mut self, inbox: Inbox<MetricEvent>) {
        tracing::info!(
            flush_secs = self.flush_interval.as_secs(),
            "Metrics aggregator started"
        );
        let mut ticker = tokio::time::interval(self.flush_interval.max(MIN_TICK));

        loop {
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => {
                        self.push(event);
                        if self.flush_due() {
                            self.flush().await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.flush_due() {
                        self.flush().await;
                    }
                }
            }
        }

        self.flush().await;
        tracing::info!(unflushed = self.buffer.len(), "Metrics aggregator stopped");
    }

    fn push(&mut self, event: MetricEvent) {
        if self.buffer.len() >= MAX_BUFFERED_EVENTS {
            self.buffer.pop_front();
            tracing::warn!(max = MAX_BUFFERED_EVENTS, "Metrics buffer full, dropping oldest event");
        }
        self.buffer.push_back(event);
    }

    fn flush_due(&self) -> bool {
        self.last_flush.elapsed() >= self.flush_interval
    }

    async fn flush(&mut self) {
        self.last_flush = Instant::now();
        if self.buffer.is_empty() {
            return;
        }

        let batch = self.buffer.make_contiguous();
        match self.coordinator.push_metrics(batch).await {
            Ok(()) => {
                tracing::debug!(events = batch.len(), "Metrics flushed");
                self.buffer.clear();
            }
            Err(e) => {
                tracing::warn!(error = %e, buffered = self.buffer.len(), "Metrics flush failed");
                self.kill_switch.record_error();
            }
        }
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
