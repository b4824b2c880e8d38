use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{Path, State},
    http::{Method, Request, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use hirelens_monitor::config::MonitorConfig;
use hirelens_monitor::error::AppError;
use hirelens_monitor::{server, AppState};

// ─── Test application ────────────────────────────────────────────

async fn list_jobs() -> Json<Value> {
    Json(json!({ "jobs": [] }))
}

async fn get_job(Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    if id == "missing" {
        return Err(AppError::NotFound(format!("job '{id}' not found")));
    }
    Ok(Json(json!({ "id": id })))
}

async fn create_job(Json(body): Json<Value>) -> Result<Json<Value>, AppError> {
    if body.get("title").is_none() {
        return Err(AppError::BadRequest("title is required".into()));
    }
    Ok(Json(body))
}

async fn parse_resume() -> Result<Json<Value>, AppError> {
    Err(AppError::Database("connection refused".into()))
}

async fn slow_report() -> &'static str {
    tokio::time::sleep(Duration::from_millis(80)).await;
    "done"
}

async fn explode() -> &'static str {
    panic!("interview scheduler exploded")
}

async fn recovered(State(state): State<Arc<AppState>>) -> &'static str {
    state
        .errors
        .log_error("DatabaseError", "cache miss, fell back to primary", None, None);
    "fallback"
}

fn app_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/resumes/parse", post(parse_resume))
        .route("/api/reports/slow", get(slow_report))
        .route("/api/interviews/explode", get(explode))
        .route("/api/recovered", get(recovered))
}

fn test_app(config: MonitorConfig) -> (Arc<AppState>, Router) {
    let state = Arc::new(AppState::new(config));
    let router = server::create_router(state.clone(), app_routes());
    (state, router)
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        slow_request_threshold: Duration::from_millis(50),
        ..MonitorConfig::default()
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ─── Log capture ─────────────────────────────────────────────────

const OUTCOME_MESSAGES: [&str; 3] = ["request completed", "slow request", "request failed"];

/// Collects the per-request outcome log lines emitted by the interceptor.
#[derive(Clone, Default)]
struct OutcomeLog {
    messages: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor(Option<String>);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for OutcomeLog {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if let Some(message) = visitor.0 {
            if OUTCOME_MESSAGES.contains(&message.as_str()) {
                self.messages.lock().push(message);
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn responses_carry_timing_headers() {
    let (_, app) = test_app(fast_config());

    let response = send(&app, Method::GET, "/api/jobs", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response_time = response.headers()["x-response-time"].to_str().unwrap();
    assert!(response_time.ends_with('s'));
    let secs: f64 = response_time.trim_end_matches('s').parse().unwrap();
    assert!(secs >= 0.0);

    assert!(response.headers()["server-timing"]
        .to_str()
        .unwrap()
        .starts_with("total;dur="));
    assert_eq!(response.headers()["x-request-id"].len(), 36);
}

#[tokio::test]
async fn metrics_endpoint_reports_requests_and_errors() {
    let (_, app) = test_app(fast_config());

    send(&app, Method::GET, "/api/jobs", None).await;
    send(&app, Method::GET, "/api/jobs/7", None).await;
    send(&app, Method::GET, "/api/jobs/missing", None).await;
    let bad = send(&app, Method::POST, "/api/jobs", Some(json!({ "company": "x" }))).await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    let db = send(&app, Method::POST, "/api/resumes/parse", None).await;
    assert_eq!(db.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(db).await["error"], "internal server error");
    send(&app, Method::GET, "/api/reports/slow", None).await;

    let response = send(&app, Method::GET, "/api/monitoring/metrics", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;

    let perf = &report["performance"];
    assert_eq!(perf["total_requests"], 6);
    assert_eq!(perf["failed_requests"], 3);
    assert_eq!(perf["slow_requests"], 1);

    let endpoints = &perf["endpoint_stats"];
    assert_eq!(endpoints["GET /api/jobs"]["count"], 1);
    assert_eq!(endpoints["GET /api/jobs/:id"]["count"], 2);
    assert_eq!(endpoints["POST /api/jobs"]["count"], 1);
    assert_eq!(endpoints["GET /api/reports/slow"]["slow_count"], 1);
    assert!(endpoints["GET /api/reports/slow"]["avg_time"].as_f64().unwrap() >= 0.08);

    let errors = &report["errors"];
    assert_eq!(errors["total_errors"], 3);
    assert_eq!(errors["by_type"]["ValidationError"], 2);
    assert_eq!(errors["by_type"]["DatabaseError"], 1);
}

#[tokio::test]
async fn panicking_handler_is_tracked_as_unhandled() {
    let (state, app) = test_app(fast_config());

    let response = send(&app, Method::GET, "/api/interviews/explode", None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key("x-response-time"));

    let snap = state.errors.snapshot();
    assert_eq!(snap.by_type["UnhandledException"], 1);
    assert!(snap.recent[0].message.contains("interview scheduler exploded"));
    assert_eq!(snap.recent[0].context["endpoint"], "GET /api/interviews/explode");
    assert_eq!(state.metrics.snapshot().counters.failed_requests, 1);
}

#[tokio::test]
async fn error_context_includes_request_metadata() {
    let (state, app) = test_app(fast_config());

    let request = Request::builder()
        .uri("/api/jobs/missing")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();

    let record = state.errors.recent(1).remove(0);
    assert_eq!(record.error_type, "ValidationError");
    assert_eq!(record.message, "job 'missing' not found");
    assert_eq!(record.context["status"], 404);
    assert_eq!(record.context["method"], "GET");
    assert_eq!(record.context["path"], "/api/jobs/missing");
    assert_eq!(record.context["client_ip"], "203.0.113.9");
    assert_eq!(record.context["request_id"], request_id.as_str());
    assert!(record.context["duration"].is_f64());
}

#[tokio::test]
async fn recovered_errors_are_still_counted() {
    let (state, app) = test_app(fast_config());

    let response = send(&app, Method::GET, "/api/recovered", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let snap = state.errors.snapshot();
    assert_eq!(snap.total_errors, 1);
    assert_eq!(snap.by_type["DatabaseError"], 1);
    assert_eq!(state.metrics.snapshot().counters.failed_requests, 0);
}

#[tokio::test]
async fn errors_endpoint_lists_newest_first() {
    let (_, app) = test_app(fast_config());

    for id in ["missing", "7", "missing"] {
        send(&app, Method::GET, &format!("/api/jobs/{id}"), None).await;
    }
    send(&app, Method::POST, "/api/resumes/parse", None).await;

    let listing = json_body(send(&app, Method::GET, "/api/monitoring/errors?limit=2", None).await).await;
    assert_eq!(listing["count"], 2);
    assert_eq!(listing["errors"][0]["type"], "DatabaseError");
    assert_eq!(listing["errors"][1]["type"], "ValidationError");
    assert_eq!(listing["errors"][0]["context"]["endpoint"], "POST /api/resumes/parse");
}

#[tokio::test]
async fn request_bodies_pass_through_when_logged() {
    let config = MonitorConfig {
        log_request_bodies: true,
        ..fast_config()
    };
    let (_, app) = test_app(config);

    let payload = json!({ "title": "Rust engineer", "token": "abc123" });
    let response = send(&app, Method::POST, "/api/jobs", Some(payload.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    // redaction only affects the log line, never the handler input
    assert_eq!(json_body(response).await, payload);
}

#[tokio::test]
async fn latency_endpoint_reports_percentiles() {
    let (_, app) = test_app(fast_config());
    send(&app, Method::GET, "/api/jobs", None).await;

    let latency = json_body(send(&app, Method::GET, "/api/monitoring/latency", None).await).await;
    assert_eq!(latency["e2e"]["count"], 1);
    assert!(latency["e2e"]["p50"].as_u64().unwrap() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_lose_no_updates() {
    const REQUESTS: usize = 2_000;
    let (state, app) = test_app(MonitorConfig::default());

    let mut handles = Vec::with_capacity(REQUESTS);
    for _ in 0..REQUESTS {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let request = Request::builder()
                .uri("/api/jobs")
                .body(Body::empty())
                .unwrap();
            app.oneshot(request).await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let snap = state.metrics.snapshot();
    assert_eq!(snap.counters.total_requests, REQUESTS as u64);
    assert_eq!(snap.endpoint_stats["GET /api/jobs"].count, REQUESTS as u64);
}

#[tokio::test]
async fn health_endpoint_responds() {
    let (_, app) = test_app(MonitorConfig::default());
    let body = json_body(send(&app, Method::GET, "/api/health", None).await).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn each_request_logs_exactly_one_outcome_line() {
    let log = OutcomeLog::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(log.clone()));
    let (_, app) = test_app(fast_config());

    send(&app, Method::GET, "/api/jobs", None).await;
    send(&app, Method::GET, "/api/reports/slow", None).await;
    send(&app, Method::GET, "/api/jobs/missing", None).await;
    send(&app, Method::GET, "/api/interviews/explode", None).await;

    let messages = log.messages.lock().clone();
    assert_eq!(
        messages,
        vec!["request completed", "slow request", "request failed", "request failed"]
    );
}

#[tokio::test]
async fn cors_preflight_is_timed_and_counted() {
    let (state, app) = test_app(fast_config());

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/jobs")
        .header("origin", "https://careers.example.com")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("access-control-allow-origin"));
    assert!(response.headers().contains_key("x-response-time"));
    assert_eq!(state.metrics.snapshot().counters.total_requests, 1);
}
