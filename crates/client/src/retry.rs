#![forbid(unsafe_code)]

use std::time::Duration;

pub const DEFAULT_SNAPSHOT_ATTEMPTS: u32 = 6;
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Backoff {
    /// Delay after the `attempt`-th failure (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = attempt.min(32) as i32;
                let scaled = initial.as_secs_f64() * multiplier.max(1.0).powi(exponent);
                Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
            }
        }
    }
}

/// Bounded retry for "not created yet" snapshot lookups.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_SNAPSHOT_ATTEMPTS, DEFAULT_SNAPSHOT_INTERVAL)
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(interval),
        }
    }

    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                initial,
                max,
                multiplier: 2.0,
            },
        }
    }

    /// Upper bound on the total time spent sleeping between attempts.
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.backoff.delay(attempt))
            .sum()
    }
}

/// What to do when a live stream drops.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ReconnectPolicy {
    /// A dropped stream stays dropped until the caller reopens it.
    #[default]
    Never,
    Backoff {
        backoff: Backoff,
        /// `None` keeps trying.
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    pub fn exponential() -> Self {
        Self::Backoff {
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            max_attempts: None,
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based), or `None` to give up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Backoff {
                backoff,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|max| attempt >= max) {
                    return None;
                }
                Some(backoff.delay(attempt))
            }
        }
    }
}
