//! Tunables for the idempotency service.

use std::time::Duration;

/// Environment variable overriding the record TTL.
pub const IDEMPOTENCY_TTL_HOURS_ENV: &str = "IDEMPOTENCY_TTL_HOURS";

/// Environment abstraction so tests avoid mutating the process environment.
pub trait IdempotencyEnv {
    /// Fetch a string value by name.
    fn string(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultIdempotencyEnv;

impl IdempotencyEnv for DefaultIdempotencyEnv {
    fn string(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Record lifetime and the polling budget used while another delivery holds
/// the claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    ttl: Duration,
    processing_poll_attempts: u32,
    processing_poll_interval: Duration,
}

impl IdempotencyConfig {
    const DEFAULT_TTL_HOURS: u64 = 24;
    const MIN_TTL_HOURS: u64 = 1;
    // Ten years.
    const MAX_TTL_HOURS: u64 = 24 * 365 * 10;
    const DEFAULT_POLL_ATTEMPTS: u32 = 20;
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

    /// Load the TTL from `IDEMPOTENCY_TTL_HOURS`, clamped to one hour through
    /// ten years.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(&DefaultIdempotencyEnv)
    }

    /// Load the TTL from a custom environment source.
    pub fn from_env_with(env: &impl IdempotencyEnv) -> Self {
        let hours = env
            .string(IDEMPOTENCY_TTL_HOURS_ENV)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_TTL_HOURS);
        Self::default().with_ttl_hours(hours)
    }

    /// Replace the TTL, clamped like [`Self::from_env`].
    #[must_use]
    pub fn with_ttl_hours(self, hours: u64) -> Self {
        let clamped = hours.clamp(Self::MIN_TTL_HOURS, Self::MAX_TTL_HOURS);
        Self {
            ttl: Duration::from_secs(clamped.saturating_mul(3600)),
            ..self
        }
    }

    /// Replace the TTL without clamping.
    #[must_use]
    pub const fn with_ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    /// Replace the polling budget.
    #[must_use]
    pub const fn with_processing_poll(self, attempts: u32, interval: Duration) -> Self {
        Self {
            processing_poll_attempts: attempts,
            processing_poll_interval: interval,
            ..self
        }
    }

    /// Record time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lookups performed while another delivery is `processing`.
    #[must_use]
    pub const fn processing_poll_attempts(&self) -> u32 {
        self.processing_poll_attempts
    }

    /// Pause between those lookups.
    #[must_use]
    pub const fn processing_poll_interval(&self) -> Duration {
        self.processing_poll_interval
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(Self::DEFAULT_TTL_HOURS * 3600),
            processing_poll_attempts: Self::DEFAULT_POLL_ATTEMPTS,
            processing_poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}
