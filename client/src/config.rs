//! Client settings loaded via OrthoConfig.
//!
//! Values come from CLI arguments, `COMMUNITY_*` environment variables, and
//! configuration files. Accessors turn the raw values into the typed
//! policies consumed by the engine and its adapters.

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use url::Url;

use crate::domain::backoff::BackoffPolicy;
use crate::domain::community_api::UndoRefetchPolicy;
use crate::domain::idempotency::IdempotencyConfig;
use crate::domain::outbox::OutboxDrainConfig;
use crate::outbound::http::HttpBackendConfig;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_OUTBOX_DIR: &str = "./outbox";
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_UNDO_REFETCH_ATTEMPTS: u32 = 3;
const DEFAULT_UNDO_REFETCH_DELAY_MS: u64 = 250;
const DEFAULT_IDEMPOTENCY_TTL_HOURS: u64 = 24;
const DEFAULT_OUTBOX_MAX_RETRIES: u32 = 5;

/// Problems turning loaded settings into runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// `base_url` was not provided.
    #[error("base_url is required (set COMMUNITY_BASE_URL or base_url in a config file)")]
    MissingBaseUrl,
    /// `base_url` is not an absolute URL.
    #[error("base_url {value:?} is not a valid URL: {message}")]
    InvalidBaseUrl {
        /// Raw configured value.
        value: String,
        /// Parser message.
        message: String,
    },
}

/// Settings for the community client and the `outbox-drain` binary.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "COMMUNITY")]
pub struct ClientSettings {
    /// Backend project URL.
    pub base_url: Option<String>,
    /// Public API key sent as the `apikey` header.
    pub anon_key: Option<String>,
    /// Per-request HTTP timeout in milliseconds.
    pub request_timeout_ms: Option<u64>,
    /// Directory holding the durable outbox.
    pub outbox_dir: Option<PathBuf>,
    /// Retries allowed for transient HTTP failures.
    pub retry_max_attempts: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    pub retry_base_delay_ms: Option<u64>,
    /// Cap on retry delays, in milliseconds.
    pub retry_max_delay_ms: Option<u64>,
    /// Fetches attempted after an undo before probing visibility.
    pub undo_refetch_attempts: Option<u32>,
    /// Pause between undo re-fetches, in milliseconds.
    pub undo_refetch_delay_ms: Option<u64>,
    /// Lifetime of client idempotency records, in hours.
    pub idempotency_ttl_hours: Option<u64>,
    /// Drain failures tolerated before an outbox entry is marked `failed`.
    pub outbox_max_retries: Option<u32>,
}

impl ClientSettings {
    /// Parsed backend URL.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the URL is missing or malformed.
    pub fn base_url(&self) -> Result<Url, SettingsError> {
        let raw = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(SettingsError::MissingBaseUrl)?;
        Url::parse(raw).map_err(|error| SettingsError::InvalidBaseUrl {
            value: raw.to_owned(),
            message: error.to_string(),
        })
    }

    /// Per-request HTTP timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }

    /// Directory holding the durable outbox.
    #[must_use]
    pub fn outbox_dir(&self) -> PathBuf {
        self.outbox_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTBOX_DIR))
    }

    /// Retry policy for HTTP calls.
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.retry_max_attempts.unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
            base_delay: Duration::from_millis(
                self.retry_base_delay_ms
                    .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
            ),
            max_delay: Duration::from_millis(
                self.retry_max_delay_ms.unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
            ),
        }
    }

    /// Re-fetch budget after an undo.
    #[must_use]
    pub fn undo_refetch(&self) -> UndoRefetchPolicy {
        UndoRefetchPolicy {
            attempts: self
                .undo_refetch_attempts
                .unwrap_or(DEFAULT_UNDO_REFETCH_ATTEMPTS),
            delay: Duration::from_millis(
                self.undo_refetch_delay_ms
                    .unwrap_or(DEFAULT_UNDO_REFETCH_DELAY_MS),
            ),
        }
    }

    /// Idempotency record lifetime, clamped by [`IdempotencyConfig`].
    #[must_use]
    pub fn idempotency(&self) -> IdempotencyConfig {
        IdempotencyConfig::default().with_ttl_hours(
            self.idempotency_ttl_hours
                .unwrap_or(DEFAULT_IDEMPOTENCY_TTL_HOURS),
        )
    }

    /// Drain limits; entries reschedule with the HTTP retry growth.
    #[must_use]
    pub fn drain(&self) -> OutboxDrainConfig {
        OutboxDrainConfig {
            max_retries: self.outbox_max_retries.unwrap_or(DEFAULT_OUTBOX_MAX_RETRIES),
            backoff: self.backoff_policy(),
        }
    }

    /// Connection settings for the HTTP adapter.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the base URL is missing or malformed.
    pub fn http_backend(&self) -> Result<HttpBackendConfig, SettingsError> {
        Ok(HttpBackendConfig {
            base_url: self.base_url()?,
            anon_key: self.anon_key.clone(),
            request_timeout: self.request_timeout(),
        })
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for client configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 11] = [
        "COMMUNITY_BASE_URL",
        "COMMUNITY_ANON_KEY",
        "COMMUNITY_REQUEST_TIMEOUT_MS",
        "COMMUNITY_OUTBOX_DIR",
        "COMMUNITY_RETRY_MAX_ATTEMPTS",
        "COMMUNITY_RETRY_BASE_DELAY_MS",
        "COMMUNITY_RETRY_MAX_DELAY_MS",
        "COMMUNITY_UNDO_REFETCH_ATTEMPTS",
        "COMMUNITY_UNDO_REFETCH_DELAY_MS",
        "COMMUNITY_IDEMPOTENCY_TTL_HOURS",
        "COMMUNITY_OUTBOX_MAX_RETRIES",
    ];

    fn load_from_empty_args() -> ClientSettings {
        ClientSettings::load_from_iter([OsString::from("outbox-drain")])
            .expect("config should load")
    }

    fn cleared_env() -> Vec<(&'static str, Option<String>)> {
        VARS.iter().map(|name| (*name, None)).collect()
    }

    #[rstest]
    fn default_values_are_used_when_missing() {
        let _guard = lock_env(cleared_env());

        let settings = load_from_empty_args();

        assert_eq!(settings.base_url(), Err(SettingsError::MissingBaseUrl));
        assert_eq!(settings.request_timeout(), Duration::from_secs(15));
        assert_eq!(settings.outbox_dir(), PathBuf::from("./outbox"));
        assert_eq!(settings.backoff_policy(), BackoffPolicy::default());
        assert_eq!(settings.undo_refetch(), UndoRefetchPolicy::default());
        assert_eq!(settings.drain(), OutboxDrainConfig::default());
        assert_eq!(settings.idempotency().ttl(), Duration::from_secs(24 * 3600));
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let mut vars = cleared_env();
        vars.extend([
            ("COMMUNITY_BASE_URL", Some("https://project.example.co".to_owned())),
            ("COMMUNITY_ANON_KEY", Some("anon".to_owned())),
            ("COMMUNITY_REQUEST_TIMEOUT_MS", Some("2500".to_owned())),
            ("COMMUNITY_OUTBOX_DIR", Some("/tmp/community-outbox".to_owned())),
            ("COMMUNITY_RETRY_MAX_ATTEMPTS", Some("1".to_owned())),
            ("COMMUNITY_OUTBOX_MAX_RETRIES", Some("9".to_owned())),
        ]);
        let _guard = lock_env(vars);

        let settings = load_from_empty_args();
        let http = settings.http_backend().expect("valid backend config");

        assert_eq!(http.base_url.as_str(), "https://project.example.co/");
        assert_eq!(http.anon_key.as_deref(), Some("anon"));
        assert_eq!(http.request_timeout, Duration::from_millis(2500));
        assert_eq!(settings.outbox_dir(), PathBuf::from("/tmp/community-outbox"));
        assert_eq!(settings.backoff_policy().max_retries, 1);
        assert_eq!(settings.drain().max_retries, 9);
        assert_eq!(settings.drain().backoff.max_retries, 1);
    }

    #[rstest]
    #[case::zero(0, 1)]
    #[case::huge(u64::MAX, 24 * 365 * 10)]
    fn idempotency_ttl_is_clamped(#[case] configured: u64, #[case] expected_hours: u64) {
        let settings = ClientSettings {
            idempotency_ttl_hours: Some(configured),
            ..load_unconfigured()
        };

        assert_eq!(
            settings.idempotency().ttl(),
            Duration::from_secs(expected_hours * 3600)
        );
    }

    #[rstest]
    fn malformed_urls_are_reported() {
        let settings = ClientSettings {
            base_url: Some("not a url".to_owned()),
            ..load_unconfigured()
        };

        assert!(matches!(
            settings.base_url(),
            Err(SettingsError::InvalidBaseUrl { value, .. }) if value == "not a url"
        ));
    }

    fn load_unconfigured() -> ClientSettings {
        let _guard = lock_env(cleared_env());
        load_from_empty_args()
    }
}
