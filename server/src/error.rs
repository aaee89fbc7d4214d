//! HTTP error responses, rendered as `{"detail": "..."}`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use leafguard::LeafGuardError;

#[derive(Debug)]
pub enum ApiError {
    /// The upload is present but not a usable image
    BadRequest(String),
    /// The request lacks the `file` field
    Unprocessable(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> &str {
        match self {
            ApiError::BadRequest(d) | ApiError::Unprocessable(d) | ApiError::Internal(d) => d,
        }
    }
}

impl From<LeafGuardError> for ApiError {
    fn from(err: LeafGuardError) -> Self {
        match err {
            LeafGuardError::ImageDecode(msg) => ApiError::BadRequest(format!("invalid image: {}", msg)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self.detail());
        }
        (status, Json(json!({ "detail": self.detail() }))).into_response()
    }
}
