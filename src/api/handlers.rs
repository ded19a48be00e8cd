use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Multipart, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::storage::{NodeHandle, StorageError};
use crate::ChunkVaultError;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub file: Option<String>,
}

impl FileQuery {
    fn file_id(query: Result<Query<FileQuery>, QueryRejection>) -> Result<String, ApiError> {
        query
            .ok()
            .and_then(|Query(q)| q.file)
            .filter(|name| !name.is_empty())
            .ok_or(ApiError::MissingFileParam)
    }
}

#[derive(Debug, Deserialize)]
pub struct AddServerRequest {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub file_id: String,
    pub upload_id: Uuid,
    pub size: u64,
    pub parts: usize,
    pub node_count: usize,
    pub committed_at: Option<i64>,
}

/// Strip any client-side directories from an uploaded file name
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// POST /upload
pub async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<StatusCode, ApiError> {
    let mut multipart = multipart.map_err(|_| ApiError::MissingUpload)?;

    let (file_id, data) = loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|_| ApiError::MissingUpload)?
            .ok_or(ApiError::MissingUpload)?;
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_id = field
            .file_name()
            .map(|name| base_name(name).to_string())
            .filter(|name| !name.is_empty())
            .ok_or(ApiError::MissingUpload)?;
        let data = field.bytes().await.map_err(|e| {
            tracing::warn!(file_id = %file_id, error = %e, "failed to read upload body");
            ApiError::UnreadableUpload
        })?;
        break (file_id, data);
    };

    state.vault.upload(&file_id, &data).await?;
    Ok(StatusCode::CREATED)
}

/// GET /download?file=<name>
pub async fn download(
    State(state): State<Arc<AppState>>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let file_id = FileQuery::file_id(query)?;
    let data = state.vault.download(&file_id).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        file_id.replace(['"', '\\'], "_")
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| ApiError::Internal(format!("invalid file name header: {}", e)))?;
    let content_type = mime_guess::from_path(&file_id).first_or_octet_stream();

    Ok((
        [
            (header::CONTENT_DISPOSITION, disposition),
            (
                header::CONTENT_TYPE,
                HeaderValue::from_str(content_type.as_ref())
                    .unwrap_or(HeaderValue::from_static("application/octet-stream")),
            ),
        ],
        Bytes::from(data),
    )
        .into_response())
}

/// Any method on /addServer; only POST is accepted
pub async fn add_server(
    State(state): State<Arc<AppState>>,
    method: Method,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<NodeHandle>), ApiError> {
    if method != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }

    let body = body.map_err(|_| ApiError::UnreadableBody)?;
    let request: AddServerRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::InvalidBody)?;
    if request.address.trim().is_empty() {
        return Err(ApiError::InvalidAddress("address must not be empty".into()));
    }

    match state.vault.add_node(&request.address).await {
        Ok(handle) => Ok((StatusCode::CREATED, Json(handle))),
        Err(ChunkVaultError::Storage(StorageError::Configuration(msg))) => {
            Err(ApiError::InvalidAddress(msg))
        }
        Err(err) => Err(err.into()),
    }
}

/// GET /files
pub async fn list_files(State(state): State<Arc<AppState>>) -> Json<Vec<FileSummary>> {
    let files = state
        .vault
        .files()
        .iter()
        .map(|layout| FileSummary {
            file_id: layout.file_id.clone(),
            upload_id: layout.upload_id,
            size: layout.size,
            parts: layout.parts.len(),
            node_count: layout.node_count,
            committed_at: layout.committed_at,
        })
        .collect();
    Json(files)
}

/// DELETE /files?file=<name>
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let file_id = FileQuery::file_id(query)?;
    state.vault.delete(&file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /servers
pub async fn list_servers(State(state): State<Arc<AppState>>) -> Json<Vec<NodeHandle>> {
    Json(state.vault.nodes().to_vec())
}
