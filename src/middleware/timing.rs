use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::redact::redact;
use crate::config::BODY_LOG_LIMIT;
use crate::error::{ErrorKind, ErrorReport};
use crate::metrics::{RequestSample, Severity};
use crate::tracker::ErrorRecord;
use crate::AppState;

const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

/// Endpoint key used when no route matched, so unknown paths share a bucket.
pub const UNMATCHED_ROUTE: &str = "<unmatched>";

/// Request-local metadata captured before the handler runs.
struct RequestMeta {
    method: Method,
    path: String,
    endpoint: String,
    client_ip: String,
    request_id: String,
}

/// Middleware wrapping every request/response cycle.
///
/// Adds three response headers:
///
///   X-Response-Time — handler wall time in seconds, e.g. `0.042s`
///   Server-Timing   — same value in the standard Server-Timing format (ms)
///   X-Request-Id    — id echoed in the request log and error context
///
/// then feeds one `RequestSample` to the metrics collector and, for failed
/// requests, one `ErrorRecord` to the error tracker. Exactly one log line is
/// emitted per completed request.
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();

    let method = req.method().clone();
    let meta = RequestMeta {
        endpoint: endpoint_id(&method, req.extensions().get::<MatchedPath>()),
        path: req.uri().path().to_owned(),
        client_ip: client_addr(&req),
        request_id: Uuid::new_v4().to_string(),
        method,
    };

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown");
    debug!(
        method = %meta.method,
        path = %meta.path,
        client_ip = %meta.client_ip,
        user_agent,
        request_id = %meta.request_id,
        "incoming request"
    );

    let req = if state.config.log_request_bodies {
        log_request_body(req, &state.config.redacted_fields).await
    } else {
        req
    };

    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    // ── Inject response headers ─────────────────────────────────
    insert_header(
        response.headers_mut(),
        X_RESPONSE_TIME,
        format!("{:.3}s", elapsed.as_secs_f64()),
    );
    insert_header(
        response.headers_mut(),
        SERVER_TIMING,
        format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0),
    );
    insert_header(response.headers_mut(), X_REQUEST_ID, meta.request_id.clone());

    // ── Log + record ────────────────────────────────────────────
    let status = response.status();
    let report = response.extensions_mut().remove::<ErrorReport>();
    let slow = state.metrics.is_slow(elapsed);
    let level = request_severity(status, report.is_some(), slow);
    log_request(level, &meta, status, elapsed, report.as_ref());

    fail_safe(&meta, || {
        record_telemetry(&state, &meta, status, elapsed, report)
    });

    response
}

/// Run a telemetry step, swallowing any panic it raises.
/// Returns `false` when the step panicked and its data was dropped.
fn fail_safe<F: FnOnce()>(meta: &RequestMeta, step: F) -> bool {
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(()) => true,
        Err(_) => {
            warn!(
                endpoint = %meta.endpoint,
                request_id = %meta.request_id,
                "telemetry recording failed, sample dropped"
            );
            false
        }
    }
}

/// Log level for a completed request. Failures outrank slowness.
pub fn request_severity(status: StatusCode, errored: bool, slow: bool) -> Severity {
    if errored || status.as_u16() >= 400 {
        Severity::Error
    } else if slow {
        Severity::Warn
    } else {
        Severity::Info
    }
}

/// Stable per-route key: `"<METHOD> <route template>"`.
pub fn endpoint_id(method: &Method, matched: Option<&MatchedPath>) -> String {
    let route = matched.map(|m| m.as_str()).unwrap_or(UNMATCHED_ROUTE);
    format!("{method} {route}")
}

/// First `X-Forwarded-For` hop, else the socket peer, else `"unknown"`.
fn client_addr(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_owned();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: String) {
    match HeaderValue::from_str(&value) {
        Ok(val) => {
            headers.insert(name, val);
        }
        Err(err) => debug!(header = %name, error = %err, "skipping unencodable header"),
    }
}

fn log_request(
    level: Severity,
    meta: &RequestMeta,
    status: StatusCode,
    elapsed: Duration,
    report: Option<&ErrorReport>,
) {
    let status = status.as_u16();
    let duration_secs = elapsed.as_secs_f64();
    match level {
        Severity::Error => error!(
            method = %meta.method,
            path = %meta.path,
            endpoint = %meta.endpoint,
            status,
            duration_secs,
            client_ip = %meta.client_ip,
            request_id = %meta.request_id,
            error_type = report.map(|r| r.kind.as_str()),
            error = report.map(|r| r.message.as_str()),
            "request failed"
        ),
        Severity::Warn => warn!(
            method = %meta.method,
            path = %meta.path,
            endpoint = %meta.endpoint,
            status,
            duration_secs,
            client_ip = %meta.client_ip,
            request_id = %meta.request_id,
            "slow request"
        ),
        Severity::Info | Severity::Debug => info!(
            method = %meta.method,
            path = %meta.path,
            endpoint = %meta.endpoint,
            status,
            duration_secs,
            client_ip = %meta.client_ip,
            request_id = %meta.request_id,
            "request completed"
        ),
    }
}

fn record_telemetry(
    state: &AppState,
    meta: &RequestMeta,
    status: StatusCode,
    elapsed: Duration,
    report: Option<ErrorReport>,
) {
    state.metrics.record(&RequestSample {
        endpoint: meta.endpoint.clone(),
        method: meta.method.to_string(),
        path: meta.path.clone(),
        duration: elapsed,
        status: status.as_u16(),
        timestamp: Utc::now(),
    });

    if report.is_none() && status.as_u16() < 400 {
        return;
    }

    let (kind, message, trace) = match report {
        Some(r) => (r.kind, r.message, r.trace),
        None => (ErrorKind::from_status(status), status.to_string(), None),
    };
    let record = ErrorRecord::new(kind.as_str(), message)
        .with_trace(trace)
        .with_context("endpoint", meta.endpoint.as_str())
        .with_context("method", meta.method.as_str())
        .with_context("path", meta.path.as_str())
        .with_context("status", status.as_u16())
        .with_context("duration", elapsed.as_secs_f64())
        .with_context("client_ip", meta.client_ip.as_str())
        .with_context("request_id", meta.request_id.as_str());
    state.errors.record(record);
}

/// Buffer and log a redacted JSON body, then hand the original bytes on.
///
/// Only POST/PUT/PATCH requests with a JSON content type and a declared
/// length within `BODY_LOG_LIMIT` are buffered; everything else passes
/// through untouched.
async fn log_request_body(req: Request, redacted_fields: &[String]) -> Request {
    if !matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
        return req;
    }
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    let declared_len = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    match declared_len {
        Some(len) if is_json && len <= BODY_LOG_LIMIT => {}
        _ => return req,
    }

    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, BODY_LOG_LIMIT).await {
        Ok(bytes) => {
            if let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                redact(&mut value, redacted_fields);
                debug!(body = %value, "request body");
            }
            Request::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            // The client stream already failed; the handler sees an empty body.
            debug!(error = %err, "request body unreadable, not logged");
            Request::from_parts(parts, Body::empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mapping_is_total() {
        let ok = StatusCode::OK;
        let not_found = StatusCode::NOT_FOUND;
        let boom = StatusCode::INTERNAL_SERVER_ERROR;

        assert_eq!(request_severity(ok, false, false), Severity::Info);
        assert_eq!(request_severity(ok, false, true), Severity::Warn);
        assert_eq!(request_severity(not_found, false, false), Severity::Error);
        assert_eq!(request_severity(boom, false, false), Severity::Error);
        assert_eq!(request_severity(boom, true, true), Severity::Error);
        assert_eq!(request_severity(ok, true, false), Severity::Error);
        assert_eq!(
            request_severity(StatusCode::PERMANENT_REDIRECT, false, false),
            Severity::Info
        );
    }

    #[test]
    fn telemetry_panics_are_swallowed() {
        let meta = RequestMeta {
            method: Method::GET,
            path: "/api/jobs".into(),
            endpoint: "GET /api/jobs".into(),
            client_ip: "unknown".into(),
            request_id: Uuid::new_v4().to_string(),
        };

        assert!(fail_safe(&meta, || {}));
        assert!(!fail_safe(&meta, || panic!("collector blew up")));
    }

    #[test]
    fn endpoint_id_falls_back_for_unmatched() {
        assert_eq!(endpoint_id(&Method::DELETE, None), "DELETE <unmatched>");
    }
}
