use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::storage::StorageError;
use crate::ChunkVaultError;

/// Every failure a handler can answer with. The message is the response body.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to read the uploaded file")]
    MissingUpload,

    #[error("Failed to read the file")]
    UnreadableUpload,

    #[error("Please provide the 'file' parameter")]
    MissingFileParam,

    #[error("File not found")]
    FileNotFound,

    #[error("Invalid request method. POST method is required.")]
    MethodNotAllowed,

    #[error("Failed to read request body")]
    UnreadableBody,

    #[error("Failed to unmarshal request body")]
    InvalidBody,

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingUpload
            | ApiError::MissingFileParam
            | ApiError::InvalidBody
            | ApiError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            ApiError::FileNotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnreadableUpload | ApiError::UnreadableBody | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ChunkVaultError> for ApiError {
    fn from(err: ChunkVaultError) -> Self {
        match err {
            ChunkVaultError::Storage(StorageError::NotFound(_)) => ApiError::FileNotFound,
            ChunkVaultError::Storage(err @ StorageError::Conflict(_)) => {
                ApiError::Conflict(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::debug!(%status, error = %self, "request rejected");
        }

        (status, format!("{}\n", self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_body_ends_with_newline() {
        let response = ApiError::FileNotFound.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"File not found\n");
    }

    #[test]
    fn test_storage_errors_map_to_status() {
        let not_found: ApiError =
            ChunkVaultError::from(StorageError::NotFound("a".into())).into();
        let conflict: ApiError =
            ChunkVaultError::from(StorageError::Conflict("a".into())).into();
        let config: ApiError =
            ChunkVaultError::from(StorageError::Configuration("no nodes".into())).into();

        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(config.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
