//! Maps `PayhubError` onto the `{ error, message }` HTTP shape of SPEC_FULL.md §6.1/§7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use payhub_core::error::PayhubError;
use serde_json::json;

pub struct ApiError(pub PayhubError);

impl From<PayhubError> for ApiError {
    fn from(e: PayhubError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PayhubError::Validation(_)
            | PayhubError::InvalidPlan(_)
            | PayhubError::InvalidAddress(_)
            | PayhubError::InvalidNetwork(_)
            | PayhubError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            PayhubError::Unauthorized => StatusCode::UNAUTHORIZED,
            PayhubError::Forbidden | PayhubError::OfacSanctioned { .. } => StatusCode::FORBIDDEN,
            PayhubError::NotFound(_) => StatusCode::NOT_FOUND,
            PayhubError::PendingExists | PayhubError::CannotCancel => StatusCode::CONFLICT,
            PayhubError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            PayhubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
