//! HTTP client for the Gemini generative-language API.

use crate::config::ProviderConfig;
use crate::provider::{
    ChatTurn, FunctionCall, FunctionCalling, FunctionCallingMode, FunctionSpec, Generation,
    GenerationRequest, GenerativeModel, ProviderError, Role, Usage,
};
use async_trait::async_trait;
use eyre::Result;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use sonic_rs::Value;
use std::sync::Arc;
use std::time::Duration;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// A thin wrapper around a pooled `reqwest::Client` bound to one API key.
///
/// The client is cheaply cloneable and safe to share across tasks.
#[derive(Clone)]
pub struct GeminiClient {
    inner: Arc<GeminiClientInner>,
}

struct GeminiClientInner {
    http: reqwest::Client,
    base_url: String,
    api_key: HeaderValue,
}

impl GeminiClient {
    /// Builds a client from configuration, or `None` when no credential is set.
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>> {
        config
            .api_key
            .as_deref()
            .map(|key| Self::new(&config.base_url, key, config.timeout))
            .transpose()
    }

    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let mut api_key = HeaderValue::from_str(api_key)?;
        api_key.set_sensitive(true);

        Ok(Self {
            inner: Arc::new(GeminiClientInner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key,
            }),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.inner.base_url, model
        )
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, ProviderError> {
        let url = self.endpoint(&request.model);
        let body = sonic_rs::to_vec(&WireRequest::from(&request))
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let response = self
            .inner
            .http
            .post(url)
            .header(API_KEY_HEADER, self.inner.api_key.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let text = response.text().await.map_err(classify)?;

        if !status.is_success() {
            let message = sonic_rs::from_str::<WireErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").into());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let wire: WireResponse =
            sonic_rs::from_str(&text).map_err(|e| ProviderError::Decode(e.to_string()))?;
        wire.into_generation()
    }
}

fn classify(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

// Wire types for `models/{model}:generateContent`.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<[WireTool<'a>; 1]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<WireToolConfig<'a>>,
}

#[derive(Serialize)]
struct WireContent<'a> {
    role: Role,
    parts: [WireTextPart<'a>; 1],
}

#[derive(Serialize)]
struct WireTextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool<'a> {
    function_declarations: &'a [FunctionSpec],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireToolConfig<'a> {
    function_calling_config: WireFunctionCallingConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireFunctionCallingConfig<'a> {
    mode: FunctionCallingMode,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    allowed_function_names: &'a [String],
}

impl<'a> From<&'a GenerationRequest> for WireRequest<'a> {
    fn from(request: &'a GenerationRequest) -> Self {
        let contents = request
            .contents
            .iter()
            .map(|ChatTurn { role, text }| WireContent {
                role: *role,
                parts: [WireTextPart { text }],
            })
            .collect();

        let (tools, tool_config) = match &request.function_calling {
            Some(FunctionCalling {
                declarations,
                mode,
                allowed_function_names,
            }) => (
                Some([WireTool {
                    function_declarations: declarations,
                }]),
                Some(WireToolConfig {
                    function_calling_config: WireFunctionCallingConfig {
                        mode: *mode,
                        allowed_function_names,
                    },
                }),
            ),
            None => (None, None),
        };

        Self {
            contents,
            tools,
            tool_config,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    usage_metadata: Option<WireUsage>,
    prompt_feedback: Option<WirePromptFeedback>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: Option<WireCandidateContent>,
}

#[derive(Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireErrorBody {
    error: WireErrorDetail,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    message: String,
}

impl WireResponse {
    fn into_generation(self) -> Result<Generation, ProviderError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::Blocked(reason));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;

        let mut generation = Generation {
            usage: self.usage_metadata.map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                candidates_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
            ..Generation::default()
        };

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                generation.text.push_str(&text);
            }
            if let Some(call) = part.function_call {
                generation.function_calls.push(call);
            }
        }

        Ok(generation)
    }
}
