//! Retry policy shared by the HTTP adapter and the outbox drainer.
//!
//! Delays grow exponentially from `base_delay`, capped at `max_delay`, and
//! pass through an injectable [`BackoffJitter`]. Only transient failures are
//! retried; rate limits wait for their cooldown and are never retried
//! inline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use rand::Rng;
use tracing::debug;

use super::ClientError;
use super::ports::CommunityBackendError;

/// How a failure should be treated by retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Safe to retry with the same idempotency key.
    Transient,
    /// Retry only after the advertised cooldown.
    RateLimited,
    /// Retrying cannot help.
    Permanent,
}

/// Failure classification used by [`Retrier`].
pub trait Classify {
    /// Bucket this failure.
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for ClientError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => FailureKind::Transient,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            _ => FailureKind::Permanent,
        }
    }
}

impl Classify for CommunityBackendError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => FailureKind::Transient,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            _ => FailureKind::Permanent,
        }
    }
}

/// HTTP method of a request considered for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    /// `GET`
    Get,
    /// `HEAD`
    Head,
    /// `OPTIONS`
    Options,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `POST`
    Post,
    /// `PATCH`
    Patch,
}

/// Whether a request with `method` may be resent automatically.
///
/// `POST` and `PATCH` are only safe when an `Idempotency-Key` accompanies
/// them.
///
/// ```
/// use community_client::domain::backoff::{RequestMethod, is_retryable_method};
///
/// assert!(is_retryable_method(RequestMethod::Get, false));
/// assert!(!is_retryable_method(RequestMethod::Post, false));
/// assert!(is_retryable_method(RequestMethod::Post, true));
/// ```
#[must_use]
pub const fn is_retryable_method(method: RequestMethod, has_idempotency_key: bool) -> bool {
    match method {
        RequestMethod::Get
        | RequestMethod::Head
        | RequestMethod::Options
        | RequestMethod::Put
        | RequestMethod::Delete => true,
        RequestMethod::Post | RequestMethod::Patch => has_idempotency_key,
    }
}

/// Retry limits and delay growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
    }

    /// Whether another attempt is allowed after `retries_so_far` retries
    /// ended in a failure of `kind`.
    #[must_use]
    pub fn allows_retry(&self, retries_so_far: u32, kind: FailureKind) -> bool {
        kind == FailureKind::Transient && retries_so_far < self.max_retries
    }

    /// Wall-clock time of retry number `attempt`.
    #[must_use]
    pub fn next_attempt_at(
        &self,
        attempt: u32,
        jitter: &dyn BackoffJitter,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let delay = jitter.jittered_delay(self.base_delay_for(attempt), attempt, now);
        after(now, delay)
    }
}

/// `now + delay`, saturating at the maximum timestamp.
#[must_use]
pub fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Async sleep abstraction so tests can skip real waits.
#[async_trait]
pub trait RetrySleeper: Send + Sync {
    /// Sleep for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Retry delay jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay derived from the exponential base delay.
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Tokio-based sleeper.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl RetrySleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic jitter seeded from the attempt and clock, adding up to a
/// quarter of the base delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptJitter;

impl BackoffJitter for AttemptJitter {
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration {
        let quarter = base.checked_div(4).unwrap_or_default();
        let spread_ms = u64::try_from(quarter.as_millis())
            .unwrap_or(u64::MAX)
            .max(1)
            .saturating_add(1);
        let seed = u64::from(now.timestamp_subsec_nanos()) ^ u64::from(attempt);
        let extra_ms = seed.checked_rem(spread_ms).unwrap_or_default();
        base.saturating_add(Duration::from_millis(extra_ms))
    }
}

/// "Equal jitter": half the base delay plus a random share of the other
/// half. Spreads retries from many devices hitting the same outage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        let floor = base.checked_div(2).unwrap_or_default();
        let spread_ms = u64::try_from(base.saturating_sub(floor).as_millis()).unwrap_or(u64::MAX);
        let extra_ms = rand::thread_rng().gen_range(0..=spread_ms);
        floor.saturating_add(Duration::from_millis(extra_ms))
    }
}

/// Runs an operation under a [`BackoffPolicy`].
#[derive(Clone)]
pub struct Retrier {
    policy: BackoffPolicy,
    sleeper: Arc<dyn RetrySleeper>,
    jitter: Arc<dyn BackoffJitter>,
    clock: Arc<dyn Clock>,
}

impl Retrier {
    /// Build a retrier from its collaborators.
    pub fn new(
        policy: BackoffPolicy,
        sleeper: Arc<dyn RetrySleeper>,
        jitter: Arc<dyn BackoffJitter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            sleeper,
            jitter,
            clock,
        }
    }

    /// Policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Jitter strategy in effect.
    #[must_use]
    pub fn jitter(&self) -> &dyn BackoffJitter {
        self.jitter.as_ref()
    }

    /// Run `operation`, retrying transient failures when `method` allows it.
    ///
    /// # Errors
    ///
    /// Returns the last failure once retries are exhausted, immediately for
    /// non-transient failures, and immediately for any failure when the
    /// method is not retryable.
    pub async fn run<T, E, F, Fut>(
        &self,
        method: RequestMethod,
        has_idempotency_key: bool,
        mut operation: F,
    ) -> Result<T, E>
    where
        E: Classify,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let retryable = is_retryable_method(method, has_idempotency_key);
        let mut retries = 0_u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error)
                    if retryable && self.policy.allows_retry(retries, error.failure_kind()) =>
                {
                    retries += 1;
                    let delay = self.jitter.jittered_delay(
                        self.policy.base_delay_for(retries),
                        retries,
                        self.clock.utc(),
                    );
                    debug!(
                        ?method,
                        attempt = retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying transient failure"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
