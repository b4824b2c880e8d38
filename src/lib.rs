//! In-process request performance monitoring and error tracking for axum
//! services.
//!
//! Every request passing through [`middleware::timing::timing_middleware`]
//! is timed and folded into a [`metrics::MetricsCollector`]; failed requests
//! are also stored in an [`tracker::ErrorTracker`]. Both live in an
//! explicitly constructed [`AppState`] that the host shares with its router.

use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod server;
pub mod tracker;

use config::MonitorConfig;
use metrics::stream::{ErrorSummary, MonitoringReport};
use metrics::{MetricsCollector, Severity};
use tracker::ErrorTracker;

/// Shared observability state, available to every handler via
/// `State<Arc<AppState>>`.
pub struct AppState {
    pub config: MonitorConfig,

    /// Request counters and per-endpoint stats.
    pub metrics: Arc<MetricsCollector>,

    /// Bounded error history.
    pub errors: Arc<ErrorTracker>,
}

impl AppState {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            metrics: Arc::new(MetricsCollector::new(config.slow_request_threshold)),
            errors: Arc::new(ErrorTracker::new(config.error_history_capacity)),
            config,
        }
    }

    /// Compose the payload served by `GET /api/monitoring/metrics`.
    pub fn report(&self) -> MonitoringReport {
        let errors = self.errors.snapshot();
        MonitoringReport {
            performance: self.metrics.snapshot(),
            errors: ErrorSummary {
                total_errors: errors.total_errors,
                by_type: errors.by_type,
            },
        }
    }

    /// Log a database query using the configured slow-query threshold.
    pub fn log_database_query(&self, query_type: &str, model: &str, duration: Duration) -> Severity {
        metrics::log_database_query(query_type, model, duration, self.config.slow_query_threshold)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
