//! Error types and HTTP response conversion.
//!
//! Every error becomes a JSON envelope. The rendered response also carries an
//! [`ErrorReport`] extension so the outermost error handler can count, log,
//! redact, and stamp the request path onto it.

use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::provider::ProviderError;

/// Relay error types with automatic HTTP status code mapping.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("malformed request body: {0}")]
    Parse(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("too many requests, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] sonic_rs::Error),

    #[error("internal error: {0}")]
    Internal(#[from] eyre::Error),

    /// Refused by the HTTP layer itself: unknown route, wrong method,
    /// oversized body.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) | RelayError::Parse(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Configuration(_)
            | RelayError::Serialization(_)
            | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Rejected { status, .. } => *status,
        }
    }

    /// Stable error-kind label exposed to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Configuration(_) => "ConfigurationError",
            RelayError::Validation(_) => "ValidationError",
            RelayError::Parse(_) => "ParseError",
            RelayError::Unauthorized => "AuthorizationError",
            RelayError::RateLimited { .. } => "RateLimitError",
            RelayError::Upstream(_) | RelayError::UpstreamTimeout => "UpstreamError",
            RelayError::Serialization(_) | RelayError::Internal(_) => "InternalError",
            RelayError::Rejected { status, .. } => match *status {
                StatusCode::NOT_FOUND => "NotFoundError",
                StatusCode::METHOD_NOT_ALLOWED => "MethodNotAllowedError",
                StatusCode::PAYLOAD_TOO_LARGE => "PayloadTooLargeError",
                status if status.is_server_error() => "InternalError",
                _ => "RequestError",
            },
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            status: self.status_code(),
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<ProviderError> for RelayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout => RelayError::UpstreamTimeout,
            other => RelayError::Upstream(other.to_string()),
        }
    }
}

/// What the error handler needs to know about a failed request.
#[derive(Clone, Debug)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

/// JSON error body.
///
/// `details` repeats `message` for clients that read the `{error, details}` shape.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub details: String,
    pub path: String,
}

impl ErrorEnvelope {
    pub fn new(kind: &str, message: String, path: String) -> Self {
        Self {
            error: kind.to_string(),
            details: message.clone(),
            message,
            path,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let report = self.report();
        let body = ErrorEnvelope::new(report.kind, report.message.clone(), String::new());
        let mut response = (report.status, Json(body)).into_response();

        if let RelayError::RateLimited { retry_after } = &self {
            // Round up so clients never retry inside the window.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }

        response.extensions_mut().insert(report);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_validation_display() {
        let err = RelayError::Validation("Prompt is required".to_string());
        assert_eq!(err.to_string(), "Prompt is required");
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::Configuration("no key".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::Parse("eof".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            RelayError::RateLimited {
                retry_after: Duration::from_secs(3)
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            RelayError::Upstream("boom".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RelayError::UpstreamTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            RelayError::Internal(eyre::eyre!("oops")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rejection_keeps_its_status() {
        let err = RelayError::Rejected {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "length limit exceeded".into(),
        };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.kind(), "PayloadTooLargeError");
        assert_eq!(err.to_string(), "length limit exceeded");

        let err = RelayError::Rejected {
            status: StatusCode::NOT_FOUND,
            message: "Not Found".into(),
        };
        assert_eq!(err.report().kind, "NotFoundError");
        assert_eq!(err.report().status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: RelayError = ProviderError::Timeout.into();
        assert!(matches!(err, RelayError::UpstreamTimeout));

        let err: RelayError = ProviderError::Status {
            status: 503,
            message: "overloaded".into(),
        }
        .into();
        assert!(matches!(err, RelayError::Upstream(_)));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_error_response_body_format() {
        let err = RelayError::Validation("Prompt is required".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();
        assert!(body_str.contains("\"error\":\"ValidationError\""));
        assert!(body_str.contains("\"message\":\"Prompt is required\""));
        assert!(body_str.contains("\"details\":\"Prompt is required\""));
    }

    #[test]
    fn test_response_carries_report() {
        let response = RelayError::Upstream("provider said no".into()).into_response();
        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert_eq!(report.status, StatusCode::BAD_GATEWAY);
        assert_eq!(report.kind, "UpstreamError");
        assert!(report.message.contains("provider said no"));
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = RelayError::RateLimited {
            retry_after: Duration::from_millis(2_500),
        }
        .into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from(3u64)
        );

        let response = RelayError::RateLimited {
            retry_after: Duration::ZERO,
        }
        .into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from(1u64)
        );
    }
}
