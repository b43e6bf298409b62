use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Unified error sum for the checkout engines. Business outcomes
/// (insufficient stock, expired hold, settled order) are explicit arms so
/// the HTTP layer can map them without string matching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("insufficient stock: {available} available, {requested} requested")]
    InsufficientStock { available: i64, requested: i32 },
    #[error("hold has expired")]
    HoldExpired,
    #[error("hold is not active (status: {0})")]
    HoldNotActive(String),
    #[error("order already finalized (status: {0})")]
    TerminalState(String),
    #[error("system busy, please retry")]
    SystemBusy,
    #[error("stock invariant violated for product {0}")]
    StockInvariant(i32),
    #[error("transient conflict, gave up after {0} attempts")]
    RetriesExhausted(u32),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Deadlock-class failures the transaction helper retries transparently.
    /// Unique races (23505) are included: both racy inserts in this system
    /// re-check existence at transaction start, so a retry converges on the
    /// idempotent answer instead of re-applying an effect.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => matches!(
                db.code().as_deref(),
                Some("40P01") | Some("40001") | Some("23505")
            ),
            _ => false,
        }
    }

    /// Postgres lock_not_available (55P03), raised when a row lock waits past
    /// the configured lock_timeout.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(
            self,
            Error::Database(sqlx::Error::Database(db)) if db.code().as_deref() == Some("55P03")
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InsufficientStock { .. } => StatusCode::CONFLICT,
            Error::HoldExpired => StatusCode::GONE,
            Error::HoldNotActive(_) => StatusCode::CONFLICT,
            Error::TerminalState(_) => StatusCode::CONFLICT,
            Error::SystemBusy => StatusCode::SERVICE_UNAVAILABLE,
            Error::StockInvariant(_) | Error::RetriesExhausted(_) | Error::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    available: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested: Option<i32>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = match &self {
            Error::InsufficientStock {
                available,
                requested,
            } => ErrorBody {
                error: "Insufficient stock".into(),
                available: Some(*available),
                requested: Some(*requested),
            },
            // Internal details stay out of responses.
            Error::Database(_) | Error::RetriesExhausted(_) | Error::StockInvariant(_) => {
                ErrorBody {
                    error: "Internal error".into(),
                    available: None,
                    requested: None,
                }
            }
            other => ErrorBody {
                error: other.to_string(),
                available: None,
                requested: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_map_to_client_statuses() {
        assert_eq!(
            Error::Validation("bad".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(Error::NotFound("hold").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::InsufficientStock {
                available: 0,
                requested: 1
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(Error::HoldExpired.status(), StatusCode::GONE);
        assert_eq!(
            Error::SystemBusy.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn plain_errors_are_not_retryable() {
        assert!(!Error::HoldExpired.is_retryable());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_retryable());
    }
}
