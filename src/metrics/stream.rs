use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::debug;

use super::collector::{LatencyReport, MetricsSnapshot};
use crate::tracker::ErrorRecord;
use crate::AppState;

const STREAM_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_ERROR_LIMIT: usize = 10;

/// Payload of `GET /api/monitoring/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringReport {
    pub performance: MetricsSnapshot,
    pub errors: ErrorSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total_errors: u64,
    pub by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecentErrors {
    pub count: usize,
    pub errors: Vec<ErrorRecord>,
}

// ─── GET /api/monitoring/metrics ─────────────────────────────────

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MonitoringReport> {
    Json(state.report())
}

// ─── GET /api/monitoring/metrics/stream ──────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a full `MonitoringReport` as JSON every second.

pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(STREAM_INTERVAL);

    let stream = IntervalStream::new(interval).map(move |_| {
        let json = match serde_json::to_string(&state.report()) {
            Ok(json) => json,
            Err(err) => {
                debug!(error = %err, "failed to serialize monitoring report");
                String::new()
            }
        };
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ─── GET /api/monitoring/errors?limit=N ──────────────────────────

pub async fn get_errors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ErrorsQuery>,
) -> Json<RecentErrors> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ERROR_LIMIT)
        .min(state.errors.capacity());
    let errors = state.errors.recent(limit);
    Json(RecentErrors {
        count: errors.len(),
        errors,
    })
}

// ─── GET /api/monitoring/latency ─────────────────────────────────

pub async fn get_latency(State(state): State<Arc<AppState>>) -> Json<LatencyReport> {
    Json(state.metrics.latency())
}
