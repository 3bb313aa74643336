//! Reconnect delay policies.

use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Decides how long to wait before reconnect attempt `attempt` (1-based,
/// counted since the last successful connection). `None` stops automatic
/// reconnection until the next manual connect.
pub trait RetryStrategy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Same delay forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub delay: Duration,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }
}

/// Doubles from `base` up to `cap`, optionally giving up after
/// `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exponent);
        Some(delay.min(self.cap))
    }
}

/// Strategy choice as it appears in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryConfig {
    Fixed {
        delay: Duration,
    },
    Exponential {
        base: Duration,
        cap: Duration,
        max_attempts: Option<u32>,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::Fixed {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl RetryConfig {
    pub fn build(&self) -> Box<dyn RetryStrategy> {
        match *self {
            Self::Fixed { delay } => Box::new(FixedDelay { delay }),
            Self::Exponential {
                base,
                cap,
                max_attempts,
            } => Box::new(ExponentialBackoff {
                base,
                cap,
                max_attempts,
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
