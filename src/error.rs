use rusqlite::ErrorCode;
use thiserror::Error;

use crate::delivery::SendOutcome;
use crate::models::DeliveryStatus;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Caller supplied bad input (missing account, empty id, ...).
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Lookup miss. Also returned for records owned by another account.
    #[error("article not found: {0}")]
    NotFound(String),

    #[error("cannot move article {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    /// The backing store is unreachable, busy or locked. Safe to retry with backoff.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A stored value could not be encoded or decoded. Indicates schema drift.
    #[error("marshal error: {0}")]
    Marshal(String),

    #[error("database error: {0}")]
    Database(String),

    /// The email was (or was not) sent but the outcome could not be persisted.
    /// Retry the recording, never the send.
    #[error("delivery outcome for article {id} was not recorded: {source}")]
    OutcomeNotRecorded {
        id: String,
        outcome: SendOutcome,
        #[source]
        source: Box<AppError>,
    },

    #[error("content extraction failed: {0}")]
    Extraction(String),

    #[error("document generation failed: {0}")]
    Generation(String),

    #[error("email error: {0}")]
    Email(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Whether the caller may retry the failed operation after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::BackendUnavailable(_) => true,
            AppError::OutcomeNotRecorded { source, .. } => source.is_retryable(),
            AppError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::FileLockingProtocolFailed
                | ErrorCode::OperationInterrupted => AppError::BackendUnavailable(err.to_string()),
                _ => AppError::Database(err.to_string()),
            },
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::Utf8Error(_)
            | rusqlite::Error::ToSqlConversionFailure(_) => AppError::Marshal(err.to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error> for AppError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => e.into(),
            tokio_rusqlite::Error::ConnectionClosed => {
                AppError::BackendUnavailable("database connection closed".to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}
