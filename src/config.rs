use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

// ─── Defaults ────────────────────────────────────────────────────

const DEFAULT_SLOW_REQUEST_SECS: f64 = 1.0;
const DEFAULT_SLOW_QUERY_SECS: f64 = 0.5;
const DEFAULT_ERROR_HISTORY: usize = 100;
/// Upper bound on the error ring buffer size.
pub const MAX_ERROR_HISTORY: usize = 100_000;
const DEFAULT_REDACTED_FIELDS: &[&str] = &["password", "token", "secret"];
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

/// Largest request body (bytes) the interceptor will buffer for logging.
pub const BODY_LOG_LIMIT: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key}: expected a number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key}: expected true/false, got {value:?}")]
    InvalidBool { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    NotPositive { key: &'static str },

    #[error("{key} must be at most {max}")]
    TooLarge { key: &'static str, max: usize },

    #[error("MONITOR_BIND_ADDR: invalid socket address {0:?}")]
    InvalidBindAddr(String),
}

/// Read-only settings consumed by the interceptor, aggregator and tracker.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Requests slower than this count as slow (strictly greater).
    pub slow_request_threshold: Duration,
    /// Queries slower than this are logged at WARN.
    pub slow_query_threshold: Duration,
    /// Ring buffer size of the error tracker.
    pub error_history_capacity: usize,
    /// Log redacted JSON bodies of POST/PUT/PATCH requests at DEBUG.
    pub log_request_bodies: bool,
    /// Field names replaced by `***` before a body is logged.
    pub redacted_fields: Vec<String>,
    pub bind_addr: SocketAddr,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            slow_request_threshold: Duration::from_secs_f64(DEFAULT_SLOW_REQUEST_SECS),
            slow_query_threshold: Duration::from_secs_f64(DEFAULT_SLOW_QUERY_SECS),
            error_history_capacity: DEFAULT_ERROR_HISTORY,
            log_request_bodies: false,
            redacted_fields: DEFAULT_REDACTED_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

impl MonitorConfig {
    /// Load from `MONITOR_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads through `lookup`,
    /// so callers can supply values without touching the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("MONITOR_SLOW_REQUEST_SECS") {
            cfg.slow_request_threshold = parse_secs("MONITOR_SLOW_REQUEST_SECS", &raw)?;
        }
        if let Some(raw) = lookup("MONITOR_SLOW_QUERY_SECS") {
            cfg.slow_query_threshold = parse_secs("MONITOR_SLOW_QUERY_SECS", &raw)?;
        }
        if let Some(raw) = lookup("MONITOR_ERROR_HISTORY") {
            let capacity: usize =
                raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                    key: "MONITOR_ERROR_HISTORY",
                    value: raw.clone(),
                })?;
            if capacity == 0 {
                return Err(ConfigError::NotPositive {
                    key: "MONITOR_ERROR_HISTORY",
                });
            }
            if capacity > MAX_ERROR_HISTORY {
                return Err(ConfigError::TooLarge {
                    key: "MONITOR_ERROR_HISTORY",
                    max: MAX_ERROR_HISTORY,
                });
            }
            cfg.error_history_capacity = capacity;
        }
        if let Some(raw) = lookup("MONITOR_LOG_REQUEST_BODIES") {
            cfg.log_request_bodies = parse_bool("MONITOR_LOG_REQUEST_BODIES", &raw)?;
        }
        if let Some(raw) = lookup("MONITOR_REDACTED_FIELDS") {
            cfg.redacted_fields = raw
                .split(',')
                .map(|f| f.trim().to_ascii_lowercase())
                .filter(|f| !f.is_empty())
                .collect();
        }
        let addr = lookup("MONITOR_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into());
        cfg.bind_addr = addr
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(addr.clone()))?;

        Ok(cfg)
    }
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::NotPositive { key });
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: raw.to_string(),
        }),
    }
}
