pub mod collector;
pub mod percentiles;
pub mod query;
pub mod stream;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use collector::{EndpointStats, GlobalCounters, LatencyReport, MetricsCollector, MetricsSnapshot};
pub use query::log_database_query;

/// A single timing observation produced by the interceptor.
/// Consumed by `MetricsCollector::record()` and then dropped.
#[derive(Debug, Clone)]
pub struct RequestSample {
    /// Stable route key, e.g. "GET /api/jobs/:id"
    pub endpoint: String,
    pub method: String,
    /// Concrete request path, e.g. "/api/jobs/42"
    pub path: String,
    /// Monotonic wall time of the whole request/response cycle
    pub duration: Duration,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
}

impl RequestSample {
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// Log level chosen for a single telemetry emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}
