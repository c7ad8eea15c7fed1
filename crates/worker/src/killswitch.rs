//! Sliding-window error-rate circuit breaker.
//!
//! Every stage reports failures here. When more than `max_count` errors
//! land within `ttl`, the registered shutdown hooks run and the process
//! exits with status 1, leaving the restart to the external supervisor.
//!
//! The error log, the hook list and the threshold check share one lock,
//! so concurrent reporters cannot race past the threshold or fire twice.
//! Each hook runs on its own thread and is abandoned after
//! `hook_timeout` so a wedged hook cannot keep a broken worker alive.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::WorkerConfig;

type Hook = Arc<dyn Fn() + Send + Sync + 'static>;
type ExitAction = Arc<dyn Fn(i32) + Send + Sync + 'static>;

#[derive(Default)]
struct State {
    errors: VecDeque<Instant>,
    hooks: Vec<(String, Hook)>,
    fired: bool,
}

pub struct KillSwitch {
    ttl: Duration,
    max_count: usize,
    hook_timeout: Duration,
    state: Mutex<State>,
    exit: ExitAction,
}

impl KillSwitch {
    pub fn new(ttl: Duration, max_count: usize, hook_timeout: Duration) -> Self {
        Self {
            ttl,
            max_count,
            hook_timeout,
            state: Mutex::new(State::default()),
            exit: Arc::new(|code| std::process::exit(code)),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.error_ttl,
            config.error_max_count,
            config.shutdown_hook_timeout,
        )
    }

    /// Replace the terminal action (process exit by default).
    pub fn with_exit_action(mut self, exit: impl Fn(i32) + Send + Sync + 'static) -> Self {
        self.exit = Arc::new(exit);
        self
    }

    /// Register a hook to run before the process terminates.
    pub fn register_shutdown_hook(
        &self,
        name: impl Into<String>,
        hook: impl Fn() + Send + Sync + 'static,
    ) {
        let mut state = self.lock();
        state.hooks.push((name.into(), Arc::new(hook)));
    }

    /// Record one error now. Returns `true` only for the call that tripped
    /// the switch; once fired, further calls are ignored and return `false`.
    pub fn record_error(&self) -> bool {
        self.record_error_at(Instant::now())
    }

    /// Record one error at `now`.
    pub fn record_error_at(&self, now: Instant) -> bool {
        let mut state = self.lock();
        if state.fired {
            return false;
        }

        state.errors.push_back(now);
        while let Some(&oldest) = state.errors.front() {
            if now.saturating_duration_since(oldest) >= self.ttl {
                state.errors.pop_front();
            } else {
                break;
            }
        }

        let count = state.errors.len();
        if count <= self.max_count {
            tracing::debug!(errors = count, max = self.max_count, "Error recorded");
            return false;
        }

        state.fired = true;
        tracing::error!(
            errors = count,
            ttl_secs = self.ttl.as_secs(),
            max = self.max_count,
            "Error rate exceeded, terminating worker",
        );
        for (name, hook) in &state.hooks {
            run_hook(name, Arc::clone(hook), self.hook_timeout);
        }
        (self.exit)(1);
        true
    }

    /// Errors currently inside the window, as of the last recorded error.
    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    pub fn has_fired(&self) -> bool {
        self.lock().fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // The deque is never left half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillSwitch")
            .field("ttl", &self.ttl)
            .field("max_count", &self.max_count)
            .field("hook_timeout", &self.hook_timeout)
            .finish_non_exhaustive()
    }
}

/// Run `hook` on a dedicated thread, waiting at most `timeout`.
fn run_hook(name: &str, hook: Hook, timeout: Duration) {
    let (done_tx, done_rx) = std_mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name(format!("shutdown-hook-{name}"))
        .spawn(move || {
            hook();
            let _ = done_tx.send(());
        });

    if let Err(e) = spawned {
        tracing::error!(hook = %name, error = %e, "Failed to start shutdown hook");
        return;
    }

    match done_rx.recv_timeout(timeout) {
        Ok(()) => tracing::info!(hook = %name, "Shutdown hook completed"),
        Err(std_mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!(hook = %name, timeout_ms = timeout.as_millis() as u64, "Shutdown hook timed out");
        }
        Err(std_mpsc::RecvTimeoutError::Disconnected) => {
            tracing::warn!(hook = %name, "Shutdown hook panicked");
        }
    }
}
