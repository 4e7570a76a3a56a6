//! Generative-model capability interface.
//!
//! The relay talks to the provider only through [`GenerativeModel`], so the
//! adapter can run against [`crate::client::GeminiClient`] in production and a
//! substitute in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sonic_rs::Value;
use thiserror::Error;

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Model,
}

/// One turn of conversation sent to the model.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ChatTurn {
    #[serde(default)]
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }
}

/// A caller-supplied function the model may choose to invoke.
///
/// `parameters` is an OpenAPI-style schema object forwarded untouched.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Function invocation policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionCallingMode {
    /// The model decides between text and a function call.
    #[default]
    Auto,
    /// The model must call one of the allowed functions.
    Any,
    /// Function calling is disabled for this request.
    None,
}

/// Function-calling options attached to a generation request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunctionCalling {
    pub declarations: Vec<FunctionSpec>,
    pub mode: FunctionCallingMode,
    pub allowed_function_names: Vec<String>,
}

/// A single provider call.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub contents: Vec<ChatTurn>,
    pub function_calling: Option<FunctionCalling>,
}

/// A function the model chose to call.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Token accounting reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub candidates_tokens: u64,
    pub total_tokens: u64,
}

/// What the provider produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
    pub usage: Option<Usage>,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request to provider failed: {0}")]
    Transport(String),

    #[error("provider did not answer in time")]
    Timeout,

    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("prompt was blocked by the provider: {0}")]
    Blocked(String),

    #[error("provider returned no candidates")]
    EmptyResponse,

    #[error("could not decode provider response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Issues exactly one call to the provider.
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(sonic_rs::to_string(&FunctionCallingMode::Any).unwrap(), "\"ANY\"");
        let mode: FunctionCallingMode = sonic_rs::from_str("\"NONE\"").unwrap();
        assert_eq!(mode, FunctionCallingMode::None);
        assert!(sonic_rs::from_str::<FunctionCallingMode>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_chat_turn_role_defaults_to_user() {
        let turn: ChatTurn = sonic_rs::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(turn, ChatTurn::user("hi"));

        let turn: ChatTurn = sonic_rs::from_str(r#"{"role":"model","text":"hello"}"#).unwrap();
        assert_eq!(turn.role, Role::Model);
    }

    #[test]
    fn test_usage_serializes_camel_case() {
        let usage = Usage {
            prompt_tokens: 1,
            candidates_tokens: 2,
            total_tokens: 3,
        };
        assert_eq!(
            sonic_rs::to_string(&usage).unwrap(),
            r#"{"promptTokens":1,"candidatesTokens":2,"totalTokens":3}"#
        );
    }
}
