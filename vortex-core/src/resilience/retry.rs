//! Retry policy: exponential backoff with jitter, rate-limit-aware delay
//! (spec.md §4.2).

use crate::error::DataProviderError;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Fixed,
    Linear,
    Exponential,
    ExponentialJitter,
}

/// Per-provider retry configuration (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: Strategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
    pub rate_limit_backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: Strategy::ExponentialJitter,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.2,
            rate_limit_backoff_multiplier: 1.5,
        }
    }
}

/// The error surfaced when a retry sequence is exhausted, carrying how many
/// attempts were actually made (spec.md §8 scenario 6).
#[derive(Debug, Clone)]
pub struct RetryExhausted {
    pub error: DataProviderError,
    pub attempts_made: u32,
}

impl RetryPolicy {
    /// Delay before the `attempt`-th retry (1-based: delay before the 2nd
    /// overall attempt is `delay_for_attempt(1)`), for non-rate-limit
    /// failures.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let raw = match self.strategy {
            Strategy::Fixed => base,
            Strategy::Linear => base * attempt as f64,
            Strategy::Exponential | Strategy::ExponentialJitter => {
                base * self.multiplier.powi(attempt as i32 - 1)
            }
        };
        let jittered = match self.strategy {
            Strategy::ExponentialJitter => raw * (1.0 + jitter_sample(self.jitter_fraction)),
            _ => raw,
        };
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Delay after a `RateLimited` response: `retry_after * multiplier`,
    /// capped at `max_delay`; falls back to `delay_for_attempt` when the
    /// provider didn't declare a `retry_after`.
    pub fn delay_for_rate_limit(&self, retry_after: Option<Duration>, attempt: u32) -> Duration {
        match retry_after {
            Some(d) => {
                let secs = (d.as_secs_f64() * self.rate_limit_backoff_multiplier)
                    .min(self.max_delay.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
            None => self.delay_for_attempt(attempt),
        }
    }

    /// Run `op`, retrying per this policy. Non-retryable errors return
    /// immediately; retryable errors are retried up to `max_attempts`,
    /// sleeping between attempts per `delay_for_attempt`/`delay_for_rate_limit`.
    pub fn execute<T>(
        &self,
        mut op: impl FnMut() -> Result<T, DataProviderError>,
    ) -> Result<T, RetryExhausted> {
        let mut attempts_made = 0;
        loop {
            attempts_made += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempts_made >= self.max_attempts {
                        return Err(RetryExhausted {
                            error: err,
                            attempts_made,
                        });
                    }
                    let delay = match &err {
                        DataProviderError::RateLimited { retry_after } => {
                            self.delay_for_rate_limit(*retry_after, attempts_made)
                        }
                        _ => self.delay_for_attempt(attempts_made),
                    };
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// Uniform jitter sample in `[0, jitter_fraction]`.
fn jitter_sample(jitter_fraction: f64) -> f64 {
    if jitter_fraction <= 0.0 {
        return 0.0;
    }
    rand::random::<f64>() * jitter_fraction
}
