use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use convoy_core::ConvoyError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Stable machine-readable code, e.g. `unknown_convoy`
    pub code: &'static str,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_argument", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
                "code": self.code,
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<ConvoyError> for AppError {
    fn from(err: ConvoyError) -> Self {
        let status = match &err {
            ConvoyError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ConvoyError::UnknownConvoy(_) => StatusCode::NOT_FOUND,
            ConvoyError::NotAMember { .. } => StatusCode::CONFLICT,
            ConvoyError::AddressNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ConvoyError::AddressLookupTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ConvoyError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::warn!(error = %err, "convoy request failed");
        }

        Self::new(status, err.code(), err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
