//! HTTP route handlers.
//!
//! Both prompt entry points (JSON body and query string) converge on
//! [`Adapter::generate`](crate::relay::adapter::Adapter::generate) and share
//! one response shape.

use crate::{
    error::RelayError,
    provider::{FunctionCall, Usage},
    relay::{
        adapter::PromptRequest,
        auth::authorize,
        error_handler::{handle_errors, panic_response},
        limiter::rate_limit,
        metrics::MetricsSnapshot,
        state::AppState,
    },
};
use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{BytesRejection, QueryRejection},
    },
    http::{StatusCode, header},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer};

/// Mount point under which the relay routes are also served.
pub const API_PREFIX: &str = "/api";

/// Success body returned by both prompt entry points.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    pub message: &'static str,
    pub response: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_calls: Option<Vec<FunctionCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Query form of the prompt request.
#[derive(Debug, Default, Deserialize)]
pub struct PromptQuery {
    pub prompt: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub environment: &'static str,
    pub provider_configured: bool,
    pub auth_enabled: bool,
    pub metrics: MetricsSnapshot,
}

/// Creates the router with all relay endpoints and the middleware chain.
///
/// Per request: error handler, timeout, panic catcher, auth, rate limit,
/// handler. A request that outlives `request_timeout_ms` is answered with 504.
pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_millis(state.config.request_timeout_ms);

    let relay = Router::new()
        .route("/gemini", get(handle_gemini_query).post(handle_gemini))
        .route_layer(from_fn_with_state(state.clone(), rate_limit))
        .route_layer(from_fn_with_state(state.clone(), authorize));

    let health = Router::new()
        .route("/health", get(handle_health))
        .route_layer(from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .merge(health)
        .merge(relay.clone())
        .nest(API_PREFIX, relay)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            timeout,
        ))
        .layer(from_fn_with_state(state.clone(), handle_errors))
        .with_state(state)
}

/// Handles `POST /gemini` with a JSON request envelope.
pub async fn handle_gemini(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, RelayError> {
    let body = body.map_err(|rejection| RelayError::Rejected {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;
    let request: PromptRequest = if body.iter().all(u8::is_ascii_whitespace) {
        PromptRequest::default()
    } else {
        state.format.deserialize_owned(&body)?
    };

    respond(&state, request).await
}

/// Handles `GET /gemini?prompt=...&model=...`.
pub async fn handle_gemini_query(
    State(state): State<AppState>,
    query: Result<Query<PromptQuery>, QueryRejection>,
) -> Result<Response, RelayError> {
    let Query(query) = query.map_err(|e| RelayError::Validation(e.body_text()))?;
    let request = PromptRequest {
        prompt: query.prompt,
        model: query.model,
        ..PromptRequest::default()
    };

    respond(&state, request).await
}

async fn respond(state: &AppState, request: PromptRequest) -> Result<Response, RelayError> {
    let normalized = state.adapter.generate(request).await?;

    let body = state
        .format
        .serialize(&GeminiResponse {
            message: "Success",
            response: normalized.text,
            model: normalized.model,
            function_calls: normalized.function_calls,
            usage: normalized.usage,
        })?
        .into_owned();

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, state.format.content_type())],
        body,
    )
        .into_response())
}

/// Handles `GET /health`.
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        environment: state.config.environment.as_str(),
        provider_configured: state.adapter.has_provider(),
        auth_enabled: !state.auth.is_open(),
        metrics: state.metrics.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_response_serialization() {
        let body = sonic_rs::to_string(&GeminiResponse {
            message: "Success",
            response: "Hello!".into(),
            model: "gemini-1.5-flash".into(),
            function_calls: None,
            usage: None,
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"message":"Success","response":"Hello!","model":"gemini-1.5-flash"}"#
        );
    }

    #[test]
    fn test_create_router() {
        let state = AppState::new(crate::Config::default(), None).unwrap();
        let _router: Router = create_router(state);
    }
}
