//! HTTP surface of a standalone storage node

use super::{NodeError, PartKey, PartUpload, StorageNode};

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;

/// Base64 inflates payloads by a third; leave room for that on top of the part size
const DEFAULT_MAX_REQUEST_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct NodeServerState {
    backend: Arc<dyn StorageNode>,
    max_request_bytes: usize,
}

impl NodeServerState {
    pub fn new(backend: Arc<dyn StorageNode>) -> Self {
        Self {
            backend,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }

    pub fn with_max_request_bytes(mut self, max: usize) -> Self {
        self.max_request_bytes = max;
        self
    }
}

pub fn node_router(state: NodeServerState) -> Router {
    let limit = state.max_request_bytes;
    Router::new()
        .route("/parts", post(store_part).get(fetch_part).delete(delete_part))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

fn node_error_response(err: NodeError) -> Response {
    let status = match &err {
        NodeError::NotFound(_) => StatusCode::NOT_FOUND,
        NodeError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(%status, error = %err, "storage node request failed");
    (status, format!("{}\n", err)).into_response()
}

/// POST /parts
async fn store_part(
    State(state): State<NodeServerState>,
    Json(upload): Json<PartUpload>,
) -> Response {
    let data = match upload.decode() {
        Ok(data) => data,
        Err(err) => return (StatusCode::BAD_REQUEST, format!("{}\n", err)).into_response(),
    };

    tracing::debug!(part = %upload.key, bytes = data.len(), "storing part");
    match state.backend.put(&upload.key, data).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => node_error_response(err),
    }
}

/// GET /parts?file_id=..&upload_id=..&index=..
async fn fetch_part(State(state): State<NodeServerState>, Query(key): Query<PartKey>) -> Response {
    match state.backend.get(&key).await {
        Ok(data) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Bytes::from(data),
        )
            .into_response(),
        Err(err) => node_error_response(err),
    }
}

/// DELETE /parts?file_id=..&upload_id=..&index=..
async fn delete_part(State(state): State<NodeServerState>, Query(key): Query<PartKey>) -> Response {
    match state.backend.delete(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => node_error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MemoryNode;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_missing_part_is_404() {
        let app = node_router(NodeServerState::new(Arc::new(MemoryNode::new("n"))));
        let uri = format!("/parts?file_id=a.txt&upload_id={}&index=0", Uuid::new_v4());

        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_payload_is_400() {
        let app = node_router(NodeServerState::new(Arc::new(MemoryNode::new("n"))));
        let body = serde_json::json!({
            "file_id": "a.txt",
            "upload_id": Uuid::new_v4(),
            "index": 0,
            "data": "not base64!!",
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/parts")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_request_size_limit() {
        let backend = Arc::new(MemoryNode::new("n"));
        let app = node_router(NodeServerState::new(backend.clone()).with_max_request_bytes(256));
        let key = PartKey::new("big.bin", Uuid::new_v4(), 0);
        let body = serde_json::to_string(&PartUpload::new(key.clone(), &[0u8; 1024])).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/parts")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!backend.contains(&key));
    }
}
