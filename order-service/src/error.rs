use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use diesel::result::DatabaseErrorKind;
use diesel_async::pooled_connection::PoolError;
use shared::{ErrorResponse, ParseStatusError};
use thiserror::Error;

/// Failure of an order operation, mapped onto an HTTP status at the edge.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Bad input from the caller. Never worth retrying as-is.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The write lost against the current state of the row.
    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[source] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Corrupt row: {0}")]
    InvalidRow(#[from] ParseStatusError),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Database(_) | ServiceError::Pool(_) | ServiceError::InvalidRow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<diesel::result::Error> for ServiceError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                ServiceError::Conflict(info.message().to_string())
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                ServiceError::Validation(info.message().to_string())
            }
            other => ServiceError::Database(other),
        }
    }
}

impl From<bb8::RunError<PoolError>> for ServiceError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        ServiceError::Pool(e.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
