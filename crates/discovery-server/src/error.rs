//! API error type and its JSON rendering

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coordination::{DeliberationError, ExperimentError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// A precondition on orchestrator state failed, or a cycle is in flight.
    #[error("{0}")]
    Conflict(String),

    #[error("Orchestrator not initialized")]
    NotInitialized,

    #[error("{0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NotInitialized => "NOT_INITIALIZED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<DeliberationError> for ApiError {
    fn from(e: DeliberationError) -> Self {
        match e {
            DeliberationError::NoActiveSession => ApiError::Conflict(e.to_string()),
            DeliberationError::UnknownAgent(_) => ApiError::NotFound(e.to_string()),
            DeliberationError::Experiment(ExperimentError::InvalidParameter { .. }) => {
                ApiError::BadRequest(e.to_string())
            }
            DeliberationError::Experiment(_) => ApiError::NotFound(e.to_string()),
            DeliberationError::NoAgents | DeliberationError::MissingGateway(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliberation_errors_map_to_status() {
        let cases = [
            (DeliberationError::NoActiveSession, StatusCode::CONFLICT),
            (
                DeliberationError::UnknownAgent("galileo".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                DeliberationError::Experiment(ExperimentError::UnknownExperiment("warp".into())),
                StatusCode::NOT_FOUND,
            ),
            (DeliberationError::NoAgents, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_message_is_passed_through() {
        let api = ApiError::from(DeliberationError::NoActiveSession);
        assert_eq!(api.to_string(), "No active session");
        assert_eq!(api.code(), "CONFLICT");
        assert_eq!(ApiError::NotInitialized.code(), "NOT_INITIALIZED");
    }
}
