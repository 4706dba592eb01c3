//! Gateway Error Types
//!
//! Errors raised at the transport boundary (proxy and REST control plane).
//! The admission engine itself never fails; these cover malformed input,
//! unknown clients, rejections rendered as responses and upstream failures.
//!
//! Each variant maps to an HTTP status code and a JSON body
//! `{"error": "<code>", "message": "<text>"}`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::rate_limit::{ClientConfigError, Rejection};

/// JSON error body returned by every HTTP surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Error types for the HTTP surfaces
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Required header absent (400)
    #[error("{0} header is required")]
    MissingHeader(String),

    /// Header present but unusable (400)
    #[error("{0}")]
    InvalidHeader(String),

    /// Request body is not valid JSON for the endpoint (400)
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    /// Client configuration failed validation (400)
    #[error(transparent)]
    InvalidConfig(#[from] ClientConfigError),

    /// Client not configured (404)
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Admission rejected the request (429)
    #[error("{}", .0.reason.message())]
    RateLimited(Rejection),

    /// Request body larger than allowed (413)
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// Upstream unreachable or failed (502)
    #[error("Bad Gateway: {0}")]
    Upstream(String),
}

impl GatewayError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingHeader(_)
            | GatewayError::InvalidHeader(_)
            | GatewayError::InvalidJson(_)
            | GatewayError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            GatewayError::ClientNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable error code for the `error` field
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingHeader(_) => "missing_header",
            GatewayError::InvalidHeader(_) => "invalid_header",
            GatewayError::InvalidJson(_) => "invalid_json",
            GatewayError::InvalidConfig(ClientConfigError::MissingClientId) => "missing_field",
            GatewayError::InvalidConfig(ClientConfigError::ZeroLimit(_)) => "invalid_field",
            GatewayError::ClientNotFound(_) => "client_not_found",
            GatewayError::RateLimited(rejection) => rejection.reason.as_str(),
            GatewayError::PayloadTooLarge(_) => "payload_too_large",
            GatewayError::Upstream(_) => "bad_gateway",
        }
    }

    /// Body for this error
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), axum::Json(self.body())).into_response();

        if let GatewayError::RateLimited(Rejection {
            retry_after: Some(wait),
            ..
        }) = &self
        {
            let secs = wait.as_secs_f64().ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
