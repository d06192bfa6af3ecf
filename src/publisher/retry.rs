//! Reconnect pacing and outage budget

use std::time::Duration;

/// Reconnect pacing: one attempt per `interval`, giving up once the
/// outage has lasted `budget`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub interval: Duration,
    pub budget: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4),
            budget: Duration::from_secs(150),
        }
    }
}

/// What to do on a retry timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTick {
    Reconnect,
    /// The outage budget is spent
    Terminated,
}

/// Counts retry ticks against the outage budget. A successful publish
/// resets the count, so the budget bounds a single continuous outage,
/// not the lifetime total.
#[derive(Debug)]
pub struct RetryState {
    config: RetryConfig,
    ticks: u32,
    max_ticks: u32,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        let max_ticks = (config.budget.as_secs_f64() / config.interval.as_secs_f64())
            .ceil()
            .max(1.0) as u32;
        Self {
            config,
            ticks: 0,
            max_ticks,
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn on_tick(&mut self) -> RetryTick {
        self.ticks += 1;
        if self.ticks >= self.max_ticks {
            RetryTick::Terminated
        } else {
            RetryTick::Reconnect
        }
    }

    /// Stream recovered, the outage is over
    pub fn reset(&mut self) {
        self.ticks = 0;
    }
}
