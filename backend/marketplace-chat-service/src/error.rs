use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("receiver user {0} not found")]
    UnknownRecipient(i64),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("storage contention did not clear after {attempts} attempts")]
    TransientConflict { attempts: u32 },

    #[error("internal server error")]
    Internal,
}

/// Faults reported by a [`crate::store::ChatStore`] implementation.
///
/// Services translate these into [`AppError`]; a unique violation on
/// conversation insert is never surfaced to callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("transient lock conflict: {0}")]
    TransientConflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientConflict(_))
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        match e.code() {
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
                StoreError::UniqueViolation(e.to_string())
            }
            Some(code)
                if *code == SqlState::T_R_DEADLOCK_DETECTED
                    || *code == SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == SqlState::LOCK_NOT_AVAILABLE =>
            {
                StoreError::TransientConflict(e.to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Backend(format!("pool: {e}"))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    status: u16,
    code: &'static str,
    retryable: bool,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() {
            ErrorKind::Retryable
        } else {
            ErrorKind::Permanent
        }
    }

    /// Whether a client may safely repeat the operation that produced this error.
    ///
    /// Persistence faults on send are not retryable: the client cannot tell
    /// whether a retry would duplicate the message.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientConflict { .. } | AppError::Internal)
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Unauthorized => 401,
            AppError::NotFound | AppError::UnknownRecipient(_) => 404,
            AppError::TransientConflict { .. } => 503,
            AppError::Persistence(_)
            | AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Internal => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "INVALID_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::NotFound => "NOT_FOUND",
            AppError::UnknownRecipient(_) => "UNKNOWN_RECIPIENT",
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
            AppError::TransientConflict { .. } => "TRANSIENT_CONFLICT",
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
                "INTERNAL_SERVER_ERROR"
            }
        }
    }

    fn error_type(&self) -> &'static str {
        match self.status_code() {
            400 => "validation_error",
            401 => "authentication_error",
            404 => "not_found_error",
            503 => "unavailable_error",
            _ => "server_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let body = ErrorBody {
            error: self.error_type(),
            message: self.to_string(),
            status: AppError::status_code(self),
            code: self.error_code(),
            retryable: self.is_retryable(),
        };
        HttpResponse::build(ResponseError::status_code(self)).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_conflict_is_retryable() {
        let err = AppError::TransientConflict { attempts: 4 };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_send_failures_are_permanent() {
        assert!(!AppError::UnknownRecipient(7).is_retryable());
        assert!(!AppError::Persistence("disk full".into()).is_retryable());
        assert_eq!(AppError::UnknownRecipient(7).status_code(), 404);
    }

    #[test]
    fn test_store_error_maps_to_persistence() {
        let err: AppError = StoreError::Backend("connection reset".into()).into();
        assert!(matches!(err, AppError::Persistence(msg) if msg.contains("connection reset")));
    }

    #[test]
    fn test_only_lock_conflicts_are_transient() {
        assert!(StoreError::TransientConflict("deadlock".into()).is_transient());
        assert!(!StoreError::UniqueViolation("dup".into()).is_transient());
        assert!(!StoreError::Backend("io".into()).is_transient());
    }
}
