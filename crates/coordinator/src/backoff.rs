//! Exponential backoff shared by the notification reconnect loop and the
//! job poller's empty-claim path.

use std::time::Duration;

/// Growth curve for retry delays.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay handed out, and the value `reset` returns to.
    pub initial_delay: Duration,
    /// Ceiling; delays never grow past this.
    pub max_delay: Duration,
    /// Growth factor applied per step.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay following `current`, capped at [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let grown = current.as_secs_f64() * config.multiplier;
    Duration::from_secs_f64(grown).min(config.max_delay)
}

/// Stateful backoff: hands out the current delay and advances.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self { config, current }
    }

    /// Delay to wait now. The following call returns a longer one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = next_delay(self.current, &self.config);
        delay
    }

    /// Back to the initial delay after a success.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) would return.
    pub fn peek(&self) -> Duration {
        self.current
    }
}
