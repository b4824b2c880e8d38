//! Timing of database queries reported by the host's data layer.
//!
//! Queries are only logged, never aggregated: the request interceptor
//! already accounts for their cost inside the enclosing request.

use std::time::Duration;

use tracing::{debug, warn};

use super::Severity;

/// Log one query observation and return the level it was logged at.
///
/// Queries that take strictly longer than `slow_threshold` are logged at
/// WARN, everything else at DEBUG.
pub fn log_database_query(
    query_type: &str,
    model: &str,
    duration: Duration,
    slow_threshold: Duration,
) -> Severity {
    let secs = duration.as_secs_f64();
    if duration > slow_threshold {
        warn!(query_type, model, duration_secs = secs, "slow query");
        Severity::Warn
    } else {
        debug!(query_type, model, duration_secs = secs, "db query");
        Severity::Debug
    }
}
