//! Scrape server.
//!
//! Serves the registry in the Prometheus text format, plus a liveness check
//! and a JSON view of collector state. Handlers only read caches; no request
//! ever triggers a query.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::collector::{CollectorSet, CollectorStatus};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Collectors in configuration order, for the JSON views.
    pub collectors: CollectorSet,
    /// Registry the collectors are registered with; `/metrics` encodes it.
    pub registry: Registry,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    collectors: usize,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/api/collectors", get(collectors_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(app_state)
}

/// Prometheus scrape endpoint.
///
/// Collectors still waiting for their first rows are left out.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&state.registry.gather()) {
        Ok(body) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Liveness check.
async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        collectors: state.collectors.len(),
    })
}

/// Collector state, in configuration order.
async fn collectors_handler(State(state): State<Arc<AppState>>) -> Json<Vec<CollectorStatus>> {
    Json(state.collectors.iter().map(|c| c.status()).collect())
}
