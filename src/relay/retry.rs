//! Fixed-interval retry policy used for every reconnect and probe loop.
//!
//! The relay deliberately keeps a flat interval rather than an adaptive
//! backoff. Sleeping goes through `tokio::time`, so tests drive it with a
//! paused clock.

use log::{error, info};
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever, waiting `interval` between attempts.
    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` attempts (at least one is always made).
    pub const fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(if max_attempts == 0 { 1 } else { max_attempts }),
        }
    }

    /// A single attempt with no retry.
    pub const fn once() -> Self {
        Self::bounded(Duration::ZERO, 1)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(false, |max| attempts >= max)
    }

    /// Run `op` until it succeeds or the attempt bound is reached.
    ///
    /// Each failure is logged with `what` as the subject. An unbounded policy
    /// never returns `Err`.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded after {} attempts", what, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if self.exhausted(attempt) => {
                    error!("{} failed after {} attempt(s): {}", what, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        "{} failed: {}. Retrying in {:.1}s (attempt {})",
                        what,
                        e,
                        self.interval.as_secs_f64(),
                        attempt
                    );
                    sleep(self.interval).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Re-run `check` at this policy's interval until it returns true.
    ///
    /// Returns the number of failed checks before success, or `None` when the
    /// attempt bound ran out first.
    pub async fn wait_until<F, Fut>(&self, mut check: F) -> Option<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut failed: u32 = 0;
        loop {
            if check().await {
                return Some(failed);
            }
            failed = failed.saturating_add(1);
            if self.exhausted(failed) {
                return None;
            }
            sleep(self.interval).await;
        }
    }
}
