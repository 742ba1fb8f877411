//! Error types for identify calls
//!
//! Errors are classified by who has to act:
//! - Client: the request itself is unusable (no email and no phone)
//! - Retryable: another writer held the database lock past the busy timeout
//! - Server: storage, schema or configuration failures

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store failure: {0}")]
    Store(#[from] DbError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<rusqlite::Error> for IdentifyError {
    fn from(err: rusqlite::Error) -> Self {
        IdentifyError::Store(DbError::Sqlite(err))
    }
}

impl IdentifyError {
    /// True when the caller sent something the core cannot act on.
    pub fn is_client_error(&self) -> bool {
        matches!(self, IdentifyError::InvalidRequest(_))
    }

    /// True when the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentifyError::Store(db) if db.is_busy())
    }

    /// HTTP-style status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            IdentifyError::InvalidRequest(_) => 400,
            IdentifyError::Store(db) if db.is_busy() => 503,
            IdentifyError::Store(_) | IdentifyError::Configuration(_) => 500,
        }
    }
}

/// Serializable error representation for callers.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub error_type: ErrorType,
    pub status_code: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Client,
    Retryable,
    Server,
}

impl From<&IdentifyError> for ErrorBody {
    fn from(err: &IdentifyError) -> Self {
        let error_type = if err.is_client_error() {
            ErrorType::Client
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::Server
        };

        ErrorBody {
            message: err.to_string(),
            error_type,
            status_code: err.status_code(),
        }
    }
}
