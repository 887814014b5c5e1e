//! Service error taxonomy.
//!
//! Every operation reachable from the HTTP API returns [`ServiceError`].
//! Each variant carries a machine-readable code and an HTTP status; the
//! server renders them as:
//!
//! ```json
//! { "status": "error", "code": "FILE_NOT_FOUND", "message": "File with id 42 not found" }
//! ```
//!
//! Lower-level helpers (HTTP transport, credentials, config) use `anyhow`
//! and are wrapped into a variant at the service boundary.

use axum::http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Uploaded file rejected (extension, size, name).
    #[error("{0}")]
    FileValidation(String),

    /// Malformed request payload.
    #[error("{0}")]
    Validation(String),

    /// Text extraction, chunking, embedding or pipeline failure.
    #[error("{0}")]
    FileProcessing(String),

    /// Metadata store failure.
    #[error("{0}")]
    Database(String),

    /// Vector index failure.
    #[error("{0}")]
    SearchIndexing(String),

    /// Chat model failure.
    #[error("{0}")]
    ChatCompletion(String),

    #[error("File with id {0} not found")]
    FileNotFound(String),

    /// Bad username or password at login.
    #[error("{0}")]
    Authentication(String),

    /// Missing, invalid or expired bearer token.
    #[error("{0}")]
    Authorization(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::FileValidation(_) => "FILE_VALIDATION_ERROR",
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::FileProcessing(_) => "FILE_PROCESSING_ERROR",
            ServiceError::Database(_) => "DATABASE_ERROR",
            ServiceError::SearchIndexing(_) => "SEARCH_INDEXING_ERROR",
            ServiceError::ChatCompletion(_) => "CHAT_COMPLETION_ERROR",
            ServiceError::FileNotFound(_) => "FILE_NOT_FOUND",
            ServiceError::Authentication(_) => "AUTHENTICATION_ERROR",
            ServiceError::Authorization(_) => "AUTHORIZATION_ERROR",
            ServiceError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::FileValidation(_) | ServiceError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::FileNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Authentication(_) | ServiceError::Authorization(_) => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::FileProcessing(_)
            | ServiceError::Database(_)
            | ServiceError::SearchIndexing(_)
            | ServiceError::ChatCompletion(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by the caller rather than a backend.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}
