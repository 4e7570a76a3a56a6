//! Translates inbound prompt requests into provider calls and normalizes the
//! provider's answer.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::RelayError,
    provider::{
        ChatTurn, FunctionCall, FunctionCalling, FunctionCallingMode, FunctionSpec,
        GenerationRequest, GenerativeModel, Usage,
    },
    relay::metrics::RelayMetrics,
};

pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Inbound request envelope, shared by the POST body and GET query forms.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub function_declarations: Option<Vec<FunctionSpec>>,
    #[serde(default)]
    pub function_calling_mode: Option<FunctionCallingMode>,
    #[serde(default)]
    pub allowed_function_names: Option<Vec<String>>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }
}

/// Provider answer in the relay's own shape.
///
/// `function_calls` is `Some` (possibly empty) exactly when the request
/// declared functions.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse {
    pub text: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_calls: Option<Vec<FunctionCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The AI request adapter.
///
/// Holds no provider when no credential was configured; every request then
/// fails with a configuration error.
#[derive(Clone)]
pub struct Adapter {
    model: Option<Arc<dyn GenerativeModel>>,
    default_model: Arc<str>,
    metrics: Arc<RelayMetrics>,
    upstream_limiter: Option<Arc<Limiter>>,
}

impl Adapter {
    pub fn new(
        model: Option<Arc<dyn GenerativeModel>>,
        default_model: &str,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            model,
            default_model: Arc::from(default_model),
            metrics,
            upstream_limiter: None,
        }
    }

    /// Caps the rate of provider calls across all clients.
    pub fn with_upstream_limit(mut self, max_qps: NonZeroU32) -> Self {
        self.upstream_limiter = Some(Arc::new(RateLimiter::direct(Quota::per_second(max_qps))));
        self
    }

    pub fn has_provider(&self) -> bool {
        self.model.is_some()
    }

    /// Validates the request and issues exactly one provider call.
    pub async fn generate(&self, request: PromptRequest) -> Result<NormalizedResponse, RelayError> {
        let generation_request = self.build_request(request)?;

        let Some(model) = self.model.as_ref() else {
            return Err(RelayError::Configuration(
                "GEMINI_API_KEY is not configured".into(),
            ));
        };

        if let Some(limiter) = &self.upstream_limiter
            && limiter.check().is_err()
        {
            return Err(RelayError::RateLimited {
                retry_after: Duration::from_secs(1),
            });
        }

        let wants_calls = generation_request.function_calling.is_some();
        let model_name = generation_request.model.clone();

        self.metrics.record_provider_call();
        let generation = {
            let mut in_flight = InFlight::new(&self.metrics, &model_name);
            let generation = model.generate(generation_request).await;
            in_flight.finish();
            generation
        }?;

        if let Some(usage) = generation.usage {
            self.metrics.record_tokens(usage.total_tokens);
        }
        info!(
            model = %model_name,
            function_calls = generation.function_calls.len(),
            total_tokens = generation.usage.map(|u| u.total_tokens),
            "provider call succeeded"
        );

        Ok(NormalizedResponse {
            text: generation.text,
            model: model_name,
            function_calls: wants_calls.then_some(generation.function_calls),
            usage: generation.usage,
        })
    }

    fn build_request(&self, request: PromptRequest) -> Result<GenerationRequest, RelayError> {
        let prompt = request
            .prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| RelayError::Validation("Prompt is required".into()))?;

        if request.history.iter().any(|turn| turn.text.trim().is_empty()) {
            return Err(RelayError::Validation(
                "History turns must not be empty".into(),
            ));
        }

        let model = match request.model.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => validate_model_name(name)?,
            _ => self.default_model.to_string(),
        };

        let function_calling = request.function_declarations.map(|declarations| FunctionCalling {
            declarations,
            mode: request.function_calling_mode.unwrap_or_default(),
            allowed_function_names: request.allowed_function_names.unwrap_or_default(),
        });

        if let Some(calling) = &function_calling
            && calling.declarations.iter().any(|s| s.name.trim().is_empty())
        {
            return Err(RelayError::Validation(
                "Function declarations must have a name".into(),
            ));
        }

        let mut contents = request.history;
        contents.push(ChatTurn::user(prompt));

        Ok(GenerationRequest {
            model,
            contents,
            function_calling,
        })
    }
}

/// Model names end up in the upstream URL path; only plain identifiers pass.
fn validate_model_name(name: &str) -> Result<String, RelayError> {
    let name = name.strip_prefix("models/").unwrap_or(name);
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(name.to_string())
    } else {
        Err(RelayError::Validation(format!("Invalid model name `{name}`")))
    }
}

/// Notices provider calls abandoned because the client went away.
///
/// Dropping the handler future drops the outbound request with it; this
/// guard only records that it happened. Unwinding from a provider panic is
/// not a disconnect and is left to the panic handler.
struct InFlight<'a> {
    metrics: &'a RelayMetrics,
    model: &'a str,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn new(metrics: &'a RelayMetrics, model: &'a str) -> Self {
        Self {
            metrics,
            model,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done && !std::thread::panicking() {
            self.metrics.record_cancelled_call();
            debug!(model = self.model, "client disconnected, provider call cancelled");
        }
    }
}
