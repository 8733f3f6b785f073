use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Smallest poll interval accepted at runtime and at startup
pub const MIN_POLL_INTERVAL_MS: u32 = 1000;

/// Runtime configuration shared by the scheduler and the control protocol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub threshold: f64,
    pub poll_interval_ms: u32,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms as u64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            poll_interval_ms: default_poll_interval_secs() * 1000,
        }
    }
}

/// Why a configuration write was refused
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("value is not numeric")]
    NotNumeric,

    #[error("value {0} is not finite")]
    NotFinite(f64),

    #[error("poll interval {value}ms is below the minimum of {min}ms")]
    IntervalTooShort { value: f64, min: u32 },

    #[error("poll interval {0}ms is out of range")]
    IntervalOutOfRange(f64),
}

/// Result of a successful write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied {
    /// Configuration after the write
    pub config: Config,

    /// Whether the written field actually changed
    pub changed: bool,
}

/// Single point of mutation for [`Config`]
///
/// Writes go through validated setters and are published on a watch channel,
/// so dependents can follow changes via [`ConfigStore::subscribe`]. Cloning
/// the store is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<watch::Sender<Config>>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        let (tx, _rx) = watch::channel(config);
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Snapshot of the current configuration
    pub fn get(&self) -> Config {
        *self.inner.borrow()
    }

    /// Receive a notification for every successful write
    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.inner.subscribe()
    }

    /// Set the alert threshold
    ///
    /// Any finite number is accepted, including negative and fractional ones.
    pub fn set_threshold(&self, value: f64) -> Result<Applied, ValidationError> {
        if !value.is_finite() {
            debug!("rejecting threshold {value}");
            return Err(ValidationError::NotFinite(value));
        }

        let mut changed = false;
        self.inner.send_modify(|config| {
            changed = config.threshold != value;
            config.threshold = value;
        });

        let config = self.get();
        trace!("threshold set to {}", config.threshold);
        Ok(Applied { config, changed })
    }

    /// Set the poll interval in milliseconds
    ///
    /// Values below [`MIN_POLL_INTERVAL_MS`] are refused. Fractional
    /// milliseconds are truncated.
    pub fn set_poll_interval_ms(&self, value: f64) -> Result<Applied, ValidationError> {
        let interval_ms = validate_poll_interval_ms(value).inspect_err(|e| {
            debug!("rejecting poll interval: {e}");
        })?;

        let mut changed = false;
        self.inner.send_modify(|config| {
            changed = config.poll_interval_ms != interval_ms;
            config.poll_interval_ms = interval_ms;
        });

        let config = self.get();
        trace!("poll interval set to {}ms", config.poll_interval_ms);
        Ok(Applied { config, changed })
    }
}

/// Check a poll interval candidate without touching any state
pub fn validate_poll_interval_ms(value: f64) -> Result<u32, ValidationError> {
    if value.is_nan() {
        return Err(ValidationError::NotNumeric);
    }

    if value < MIN_POLL_INTERVAL_MS as f64 {
        return Err(ValidationError::IntervalTooShort {
            value,
            min: MIN_POLL_INTERVAL_MS,
        });
    }

    if !value.is_finite() || value > u32::MAX as f64 {
        return Err(ValidationError::IntervalOutOfRange(value));
    }

    Ok(value.trunc() as u32)
}

fn default_threshold() -> f64 {
    0.0
}

fn default_poll_interval_secs() -> u32 {
    15
}

fn default_extract_timeout_secs() -> u64 {
    15
}

fn default_port() -> u16 {
    3000
}

fn default_bind_addr() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

/// Environment keys that must be present and non-empty
pub const REQUIRED_KEYS: [&str; 6] = [
    "LOGIN_URL",
    "USERNAME",
    "PASSWORD",
    "USERNAME_FIELD",
    "PASSWORD_FIELD",
    "METRIC_PATTERN",
];

/// Fatal startup problems
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing or empty environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How to reach and read the metric source
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub login_url: String,
    pub username: String,
    pub password: String,
    pub username_field: String,
    pub password_field: String,
    pub metric_pattern: String,
    pub metric_url: Option<String>,
    pub logout_url: Option<String>,
}

/// Where the control channel listens
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub static_dir: PathBuf,
}

/// Everything needed to start the service
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: SourceSettings,
    pub server: ServerSettings,

    /// Initial runtime configuration
    pub initial: Config,

    /// Upper bound for a single extraction
    pub extract_timeout: Duration,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    ///
    /// Every missing required key is collected before failing, so the error
    /// lists all of them at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| get(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let required = |key: &'static str| get(key).unwrap_or_default();

        let threshold = match get("THRESHOLD") {
            Some(raw) => parse_number("THRESHOLD", &raw)?,
            None => default_threshold(),
        };

        let poll_interval_ms = match get("POLL_INTERVAL") {
            Some(raw) => {
                let secs = parse_number("POLL_INTERVAL", &raw)?;
                validate_poll_interval_ms(secs * 1000.0).map_err(|e| ConfigError::Invalid {
                    key: "POLL_INTERVAL",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?
            }
            None => default_poll_interval_secs() * 1000,
        };

        let extract_timeout = match get("EXTRACT_TIMEOUT") {
            Some(raw) => {
                let secs = parse_number("EXTRACT_TIMEOUT", &raw)?;
                Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
                    key: "EXTRACT_TIMEOUT",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?
            }
            None => Duration::from_secs(default_extract_timeout_secs()),
        };

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "PORT",
                value: raw.clone(),
                reason: format!("{e}"),
            })?,
            None => default_port(),
        };

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "BIND_ADDR",
                value: raw.clone(),
                reason: format!("{e}"),
            })?,
            None => default_bind_addr(),
        };

        let settings = Settings {
            source: SourceSettings {
                login_url: required("LOGIN_URL"),
                username: required("USERNAME"),
                password: required("PASSWORD"),
                username_field: required("USERNAME_FIELD"),
                password_field: required("PASSWORD_FIELD"),
                metric_pattern: required("METRIC_PATTERN"),
                metric_url: get("METRIC_URL"),
                logout_url: get("LOGOUT_URL"),
            },
            server: ServerSettings {
                bind_addr,
                port,
                static_dir: get("STATIC_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_static_dir),
            },
            initial: Config {
                threshold,
                poll_interval_ms,
            },
            extract_timeout,
        };

        trace!(
            "loaded settings: login_url={}, initial={:?}",
            settings.source.login_url, settings.initial
        );
        Ok(settings)
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "not a finite number".to_string(),
        })
}
