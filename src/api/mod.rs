//! HTTP API Module - upload, download and node management over axum
//!
//! Every route is counted by the request metrics middleware and runs inside
//! a trace span tagged with the service name.

mod error;
mod handlers;
mod metrics;

pub use error::ApiError;
pub use handlers::{AddServerRequest, FileQuery, FileSummary};
pub use metrics::{metrics_router, track_requests, ApiMetrics, NoOpMetrics, RequestMetrics};

use std::sync::Arc;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::ChunkVault;

/// Shared by all handlers
pub struct AppState {
    pub vault: Arc<ChunkVault>,
    pub metrics: Arc<dyn RequestMetrics>,
}

impl AppState {
    pub fn new(vault: Arc<ChunkVault>, metrics: Arc<dyn RequestMetrics>) -> Self {
        Self { vault, metrics }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.vault.config.max_upload_bytes;
    let service = state.vault.config.service_name.clone();

    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/download", get(handlers::download))
        .route("/addServer", any(handlers::add_server))
        .route(
            "/files",
            get(handlers::list_files).delete(handlers::delete_file),
        )
        .route("/servers", get(handlers::list_servers))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_requests,
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(move |req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    service = %service,
                    method = %req.method(),
                    uri = %req.uri(),
                )
            }),
        )
        .with_state(state)
}
