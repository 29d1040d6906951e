//! HTTP error mapping
//!
//! Every failure leaves the gateway as `{"error": <code>, "message": <text>}`.
//! Internal causes are logged here and replaced by a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use layer_core::{ErrorCode, GateError};
use tracing::{error, warn};

use crate::protocol::ErrorBody;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Gate(GateError),
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        Self::Gate(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Gate(GateError::Internal(err))
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Gate(GateError::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Gate(e) => match e.code() {
                ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
                ErrorCode::NotFound => StatusCode::NOT_FOUND,
                ErrorCode::Conflict => StatusCode::CONFLICT,
                ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::Unauthorized => ErrorBody {
                error: "unauthorized".to_string(),
                message: "Missing or invalid API key".to_string(),
            },
            Self::Gate(e) => ErrorBody {
                error: e.code().as_str().to_string(),
                message: e.public_message(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Gate(e) = &self {
            if status.is_server_error() {
                error!("Request failed: {}", e.detail());
            } else {
                warn!("Request rejected ({}): {}", status, e);
            }
        }
        (status, Json(self.body())).into_response()
    }
}
