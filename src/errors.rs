use crate::services::file_service::FileError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Store failures are logged here and reach the client only as a generic 500.
impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::NotFound(_) => AppError::not_found("No file of given id exists"),
            FileError::Unauthorized(_) => AppError::unauthorized("Not allowed to view this file"),
            FileError::Body(source) => {
                let multipart = source
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<MultipartError>());
                match multipart {
                    Some(err) => AppError::from_multipart(err),
                    None => {
                        tracing::debug!(error = %source, "upload body could not be read");
                        AppError::bad_request("Failed reading upload body")
                    }
                }
            }
            FileError::Storage(_) | FileError::Persistence(_) => {
                tracing::error!(error = %err, "file operation failed");
                AppError::internal("Internal server error")
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::from_multipart(&err)
    }
}

impl AppError {
    /// Client-side multipart problems keep their own status (400, 413).
    fn from_multipart(err: &MultipartError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, "failed reading multipart body");
        } else {
            tracing::debug!(error = %err, "rejecting multipart body");
        }
        AppError::new(status, err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{blob_store::BlobError, file_repository::RepositoryError};
    use std::io;

    #[test]
    fn file_errors_map_to_distinct_statuses() {
        assert_eq!(
            AppError::from(FileError::NotFound("x".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(FileError::Unauthorized("x".into())).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(FileError::Storage(BlobError::NotFound("x".into()))).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::from(FileError::Persistence(RepositoryError::Duplicate("x".into()))).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unreadable_body_is_a_client_error() {
        let err = AppError::from(FileError::Body(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-upload",
        )));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = AppError::from(FileError::Storage(BlobError::Body(io::Error::other(
            "minio.internal:9000 refused connection",
        ))));
        assert!(!err.message.contains("minio"));
    }
}
