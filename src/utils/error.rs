//! API error type shared by all HTTP handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::LedgerError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    ResourceNotFound(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    InternalError(String),
}

/// JSON body returned for every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::ResourceNotFound(msg.into())
    }

    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::RecordNotFound(id) => Self::not_found(format!("Query {} not found", id)),
            LedgerError::AnalysisNotFound(id) => {
                Self::not_found(format!("Analysis {} not found", id))
            },
            LedgerError::AlreadyAnalyzed(id) => {
                Self::validation_error(format!("Query {} has already been analyzed", id))
            },
            other => {
                tracing::error!("Ledger error: {}", other);
                Self::internal_error(format!("Database error: {}", other))
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody { code: status.as_u16(), message: self.to_string() };
        (status, Json(body)).into_response()
    }
}
