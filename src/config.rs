//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::onboarding::engine::MatchMode;
use crate::tickets::RetryPolicy;

/// Where ticket reconciliation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// In the request path, after the stage change is committed.
    #[default]
    Inline,
    /// On a background worker.
    Background,
}

impl FromStr for SyncMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "background" => Ok(Self::Background),
            other => Err(ConfigError::InvalidValue {
                key: "TICKET_SYNC_MODE".to_string(),
                message: format!("unknown sync mode '{other}' (expected inline or background)"),
            }),
        }
    }
}

/// Ticket synchronization settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub mode: SyncMode,
    pub retry: RetryPolicy,
    /// How long shutdown waits for in-flight reconciliations.
    pub shutdown_grace: Duration,
    /// Ticket service base URL. Without one, tickets are kept locally.
    pub api_url: Option<String>,
    pub api_token: Option<SecretString>,
    /// Per-request timeout for the ticket service.
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(30),
            api_url: None,
            api_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Sessions idle for longer than this are evicted by the sweep.
    pub session_idle_timeout: Duration,
    /// Keep idle sessions that have not finished onboarding.
    pub preserve_incomplete: bool,
    /// How often the sweep and reconciliation pass run.
    pub sweep_interval: Duration,
    pub match_mode: MatchMode,
    /// JSON stage catalog. The built-in catalog is used when unset.
    pub catalog_path: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            session_idle_timeout: Duration::from_secs(24 * 3600), // 1 day
            preserve_incomplete: false,
            sweep_interval: Duration::from_secs(300), // 5 minutes
            match_mode: MatchMode::default(),
            catalog_path: None,
            sync: SyncConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse_var::<u64>(&lookup, key)?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };
        let millis = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse_var::<u64>(&lookup, key)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let retry = RetryPolicy {
            max_attempts: parse_var(&lookup, "TICKET_SYNC_MAX_ATTEMPTS")?
                .unwrap_or(defaults.sync.retry.max_attempts),
            base_delay: millis("TICKET_SYNC_BASE_DELAY_MS", defaults.sync.retry.base_delay)?,
            max_delay: millis("TICKET_SYNC_MAX_DELAY_MS", defaults.sync.retry.max_delay)?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TICKET_SYNC_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let sync = SyncConfig {
            mode: match lookup("TICKET_SYNC_MODE") {
                Some(v) => v.parse()?,
                None => defaults.sync.mode,
            },
            retry,
            shutdown_grace: secs("TICKET_SYNC_SHUTDOWN_GRACE_SECS", defaults.sync.shutdown_grace)?,
            api_url: lookup("TICKET_API_URL").filter(|v| !v.trim().is_empty()),
            api_token: lookup("TICKET_API_TOKEN")
                .filter(|v| !v.is_empty())
                .map(SecretString::from),
            request_timeout: secs("TICKET_API_TIMEOUT_SECS", defaults.sync.request_timeout)?,
        };

        Ok(Self {
            port: parse_var(&lookup, "ONBOARDING_PORT")?.unwrap_or(defaults.port),
            session_idle_timeout: secs(
                "ONBOARDING_IDLE_TIMEOUT_SECS",
                defaults.session_idle_timeout,
            )?,
            preserve_incomplete: parse_var(&lookup, "ONBOARDING_PRESERVE_INCOMPLETE")?
                .unwrap_or(defaults.preserve_incomplete),
            sweep_interval: secs("ONBOARDING_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            match_mode: match lookup("ONBOARDING_MATCH_MODE") {
                Some(v) => v.parse()?,
                None => defaults.match_mode,
            },
            catalog_path: lookup("ONBOARDING_CATALOG_PATH").map(PathBuf::from),
            sync,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
    }
}
