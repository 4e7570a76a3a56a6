//! Outermost error handling.
//!
//! Every stage below this middleware reports failure by returning a
//! [`RelayError`]; its response carries an [`ErrorReport`]. Here the report is
//! counted, logged, redacted in production, and rendered with the request
//! path. Error responses built by axum or tower-http themselves (unknown
//! route, wrong method, request timeout) get the same envelope.

use std::any::Any;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::{
    error::{ErrorEnvelope, ErrorReport, RelayError},
    relay::state::AppState,
};

pub const GENERIC_ERROR_MESSAGE: &str = "An internal error occurred";

const BARE_BODY_LIMIT: usize = 16 * 1024;

pub async fn handle_errors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;
    let report = response.extensions_mut().remove::<ErrorReport>();
    let (mut parts, report) = match report {
        Some(report) => (response.into_parts().0, report),
        None if response.status().is_client_error() || response.status().is_server_error() => {
            let (parts, body) = response.into_parts();
            let report = bare_report(parts.status, body).await;
            (parts, report)
        }
        None => return response,
    };

    state.metrics.record_error();

    if report.status.is_server_error() {
        error!(
            %method,
            %path,
            status = report.status.as_u16(),
            kind = report.kind,
            message = %report.message,
            "request failed"
        );
    } else {
        warn!(
            %method,
            %path,
            status = report.status.as_u16(),
            kind = report.kind,
            message = %report.message,
            "request rejected"
        );
    }

    let message = if state.config.environment.is_production() && report.status.is_server_error() {
        GENERIC_ERROR_MESSAGE.to_string()
    } else {
        report.message
    };

    let envelope = ErrorEnvelope::new(report.kind, message, path);
    let body = match state.format.serialize(&envelope) {
        Ok(bytes) => bytes.into_owned(),
        Err(e) => {
            error!(error = %e, "failed to serialize error envelope");
            br#"{"error":"InternalError","message":"An internal error occurred"}"#.to_vec()
        }
    };

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(state.format.content_type()),
    );
    Response::from_parts(parts, Body::from(body))
}

/// Describes an error response produced below the handlers (routing, body
/// limits, the request timeout), which carries no [`ErrorReport`].
async fn bare_report(status: StatusCode, body: Body) -> ErrorReport {
    if status == StatusCode::GATEWAY_TIMEOUT {
        return RelayError::UpstreamTimeout.report();
    }

    let message = axum::body::to_bytes(body, BARE_BODY_LIMIT)
        .await
        .ok()
        .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());

    RelayError::Rejected { status, message }.report()
}

/// Converts a handler panic into an internal error response.
pub fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    RelayError::Internal(eyre::eyre!("request handler panicked")).into_response()
}
