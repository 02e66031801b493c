//! # HTTP API
//!
//! Check and job endpoints. Coordinator errors map onto status codes:
//! bad input 400, unknown ids 404, conflicting state 409, storage 503.

pub mod checks;
pub mod jobs;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use citecheck_core::CheckError;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// "input", "not_found", "conflict" or "infrastructure"
    pub kind: &'static str,
    pub error: String,
}

pub struct ApiError(pub CheckError);

impl From<CheckError> for ApiError {
    fn from(err: CheckError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CheckError::Input(_) => (StatusCode::BAD_REQUEST, "input"),
            CheckError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CheckError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            CheckError::Infrastructure(_) => (StatusCode::SERVICE_UNAVAILABLE, "infrastructure"),
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                kind,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CheckError::Input("x".into()), StatusCode::BAD_REQUEST),
            (CheckError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CheckError::Conflict("x".into()), StatusCode::CONFLICT),
            (CheckError::Infrastructure("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }
}
