//! Exponential backoff for management session reconnects

use std::time::Duration;

use dm_core::config::BackoffConfig;

/// Growing delay with random jitter, reset after a successful connect
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Fraction of the delay added at random (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            current: initial,
            max,
            multiplier: multiplier.max(1.0),
            jitter: if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) },
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        // Growth past what Duration can hold saturates at the cap
        let grown =
            Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier).unwrap_or(self.max);
        self.current = grown.min(self.max);

        if self.jitter == 0.0 {
            return delay;
        }
        let extra = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay.saturating_add(Duration::try_from_secs_f64(extra).unwrap_or(Duration::ZERO))
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
