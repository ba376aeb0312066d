//! Scirocco server library logic.

pub mod api;
pub mod background;
pub mod config;
pub mod headers;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderName,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use scirocco_queue::QueueEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Queue engine over the configured store.
    pub engine: Arc<QueueEngine>,
    /// Token every protected request must present.
    pub master_token: String,
}

/// Maximum request body size (2 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/messageQueue",
            post(api::push_handler).get(api::pull_handler),
        )
        .route("/messageQueue/{id}/ack", patch(api::ack_handler))
        .route("/messageQueue/{id}/nack", patch(api::nack_handler))
        .route("/messages/{id}", get(api::fetch_handler))
        .route("/messages/{id}/ack", patch(api::ack_handler))
        .route("/messages/{id}/nack", patch(api::nack_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    let exposed: Vec<HeaderName> = vec![
        headers::ID,
        headers::FROM,
        headers::TO,
        headers::STATUS,
        headers::TRIES,
        headers::CREATED_TIME,
        headers::UPDATE_TIME,
        headers::SCHEDULED_TIME,
        headers::PROCESSING_TIME,
        headers::PROCESSED_TIME,
        headers::ERROR_TIME,
        headers::PAYLOAD_TYPE,
        axum::http::header::LOCATION,
    ];

    Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(exposed),
        )
        .layer(Extension(Arc::new(state)))
}
