//! Exponential backoff with jitter, built on [`backon`].
//!
//! Used for three different loops: retrying a single slot acquire while the
//! store is unreachable, re-running the full slot scan after exhaustion, and
//! retrying a failed renewal inside the remaining TTL window.

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use core::time::Duration;
use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Parameters of an exponential backoff loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_backoff: Duration,

    /// Upper bound for a single delay (before jitter).
    pub max_backoff: Duration,

    /// Growth factor applied after every retry.
    pub multiplier: f64,

    /// Jitter factor in `[0.0, 1.0]`. A delay `d` becomes a random value in
    /// `[d * (1 - jitter), d * (1 + jitter)]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self, name: &str) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(crate::Error::invalid_config(format!(
                "{name}.max_attempts must be greater than 0"
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(crate::Error::invalid_config(format!(
                "{name}.jitter ({}) must be within [0, 1]",
                self.jitter
            )));
        }
        if self.multiplier < 1.0 {
            return Err(crate::Error::invalid_config(format!(
                "{name}.multiplier ({}) must be at least 1",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// Jittered delay sequence over a [`backon`] exponential backoff.
///
/// Yields `None` once the policy's retries are used up.
#[derive(Debug)]
pub struct Backoff {
    delays: ExponentialBackoff,
    jitter: f64,
}

impl Backoff {
    /// Allows `max_attempts - 1` retries.
    pub fn new(policy: &RetryPolicy) -> Self {
        let retries = policy.max_attempts.saturating_sub(1) as usize;
        Self::with_retries(policy, retries)
    }

    /// Never runs out. The caller bounds the loop some other way.
    pub fn unbounded(policy: &RetryPolicy) -> Self {
        Self::with_retries(policy, usize::MAX)
    }

    fn with_retries(policy: &RetryPolicy, retries: usize) -> Self {
        let delays = ExponentialBuilder::new()
            .with_min_delay(policy.initial_backoff)
            .with_max_delay(policy.max_backoff)
            .with_factor(policy.multiplier as f32)
            .with_max_times(retries)
            .build();
        Self {
            delays,
            jitter: policy.jitter,
        }
    }

    /// Returns the next (jittered) delay, or `None` if no retry is left.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.delays
            .next()
            .map(|delay| apply_jitter(delay, self.jitter))
    }
}

fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || dur.is_zero() {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let base = dur.as_nanos() as f64;
    let jittered = rand::rng().random_range(base * (1.0 - factor)..=base * (1.0 + factor));
    Duration::from_nanos(jittered as u64)
}

/// Sleeps for `dur` unless `token` is cancelled first.
///
/// Returns `false` if the sleep was interrupted by cancellation.
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(dur) => true,
    }
}
