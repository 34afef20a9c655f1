//! Error types and constructors.
//!
//! Process-level failures (configuration, opening the database, binding the
//! listener) are reported as [`AppError`]. Failures of a single request are
//! reported as [`QueryError`], whose variants map one-to-one onto the HTTP
//! status codes the service returns.

use std::path::Path;

use axum::http::StatusCode;
pub use masterror::{AppError, AppResult};
use thiserror::Error;

/// Create config error
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// Create file read error
pub fn file_read_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!("Failed to read file '{}': {}", path, source))
}

/// Create error for a database file that cannot be opened or inspected
pub fn database_open_error(path: &Path, source: impl std::fmt::Display) -> AppError {
    AppError::internal(format!(
        "Failed to open database '{}': {}",
        path.display(),
        source
    ))
}

/// Create error for listener or serving failures
pub fn server_error(message: impl Into<String>) -> AppError {
    AppError::service(message.into())
}

/// Failure of one schema upload or query request.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A required collaborator (language model, transcription) has no
    /// credentials.
    #[error("{0} is not configured on the server")]
    NotConfigured(String),
    /// No schema has been uploaded yet.
    #[error("Database schema not uploaded")]
    NoSchema,
    /// Schema DDL could not be applied; the previous schema is still active.
    #[error("Failed to create database from schema: {0}")]
    Schema(String),
    /// The language model was unreachable or returned unusable output.
    #[error("Failed to translate the question into SQL: {0}")]
    Translation(String),
    /// The generated statement failed inside the database engine.
    #[error("An error occurred while processing the query: {0}")]
    Execution(String),
    /// Audio was received but no speech could be recognized in it.
    #[error("Could not understand audio")]
    NotUnderstood,
    /// The speech recognition service or the transcoder failed.
    #[error("Speech recognition service error: {0}")]
    TranscriptionUnavailable(String),
    /// Malformed request body.
    #[error("Invalid request: {0}")]
    InvalidRequest(String)
}

impl QueryError {
    /// HTTP status returned to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoSchema | Self::Schema(_) | Self::NotUnderstood | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotConfigured(_)
            | Self::Translation(_)
            | Self::Execution(_)
            | Self::TranscriptionUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    /// Whether the caller can fix the failure by changing the request.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        if err.is_client_error() {
            AppError::bad_request(err.to_string())
        } else {
            AppError::service(err.to_string())
        }
    }
}

/// Describe a transport error with the same wording for every collaborator
pub fn describe_http_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("Request timeout: {}", err)
    } else if err.is_connect() {
        format!("Connection failed: {}", err)
    } else if err.is_status() {
        format!("HTTP error {}: {}", err.status().unwrap_or_default(), err)
    } else {
        err.to_string()
    }
}
