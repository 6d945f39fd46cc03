//! The push-notification contract the cache's reconnect loop consumes to
//! invalidate itself as soon as a policy changes, rather than waiting out
//! a poll interval.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// A source of policy-change notifications (e.g. a LISTEN/NOTIFY
/// subscription). Payloads are opaque: the cache only cares that
/// something changed, not what.
///
/// Implementations are expected to reconnect internally is *not*
/// required — the notification listener owns reconnect/backoff and will
/// call [`NotificationListener::subscribe`] again after a stream ends or
/// errors.
#[async_trait]
pub trait NotificationListener: Send + Sync + std::fmt::Debug {
    /// Open a subscription, returning a stream of opaque change payloads.
    ///
    /// The stream ending (`None`) or erroring is treated identically by
    /// the reconnect loop: both trigger a fresh `subscribe` call after
    /// the current backoff delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription could not be opened at all.
    async fn subscribe(&self) -> Result<BoxStream<'static, Result<String>>>;
}

/// Exponential backoff with full jitter for the reconnect loop.
///
/// Matches the retry behavior of a managed LISTEN/NOTIFY client: start at
/// `initial`, double on each consecutive failure up to `max`, and jitter
/// the delay actually slept to avoid a thundering herd of reconnecting
/// listeners after a shared outage.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: std::time::Duration,
    pub max: std::time::Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: std::time::Duration::from_millis(100),
            max: std::time::Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// The un-jittered delay ceiling for the `attempt`-th consecutive
    /// failure (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let scaled = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        std::time::Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }

    /// Apply full jitter: a uniformly random duration in `[0, ceiling)`.
    ///
    /// `rng` is injected so callers can make jitter deterministic in
    /// tests; production callers pass a real RNG closure.
    pub fn jittered_delay(&self, attempt: u32, rng: impl FnOnce(f64) -> f64) -> std::time::Duration {
        let ceiling = self.delay_for(attempt);
        let fraction = rng(1.0).clamp(0.0, 1.0);
        ceiling.mul_f64(fraction)
    }
}
