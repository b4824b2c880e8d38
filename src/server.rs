use axum::{
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::error::AppError;
use crate::handlers;
use crate::metrics::stream;
use crate::middleware::timing;
use crate::AppState;

/// Monitoring and health routes, without middleware.
pub fn monitoring_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(handlers::health::health_check))
        .route("/api/monitoring/metrics", get(stream::get_metrics))
        .route("/api/monitoring/metrics/stream", get(stream::metrics_stream))
        .route("/api/monitoring/errors", get(stream::get_errors))
        .route("/api/monitoring/latency", get(stream::get_latency))
}

/// Builds the full `Router`: the host's `app` routes plus the monitoring
/// routes, all wrapped by the timing interceptor.
pub fn create_router(state: Arc<AppState>, app: Router<Arc<AppState>>) -> Router {
    app.merge(monitoring_routes())
        // ── Provide shared state to all routes above ────────────
        .with_state(state.clone())
        // ── Global middleware (applied bottom-up) ───────────────
        // Panics become 500s before the interceptor sees the response
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        // Outermost, so CORS preflights are timed and counted too
        .layer(axum_mw::from_fn_with_state(state, timing::timing_middleware))
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    AppError::Internal(format!("handler panicked: {detail}")).into_response()
}
