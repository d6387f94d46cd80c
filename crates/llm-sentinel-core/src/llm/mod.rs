pub mod gateway;
pub mod openai;
pub mod openrouter;
pub mod prompts;
mod settings;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gateway::{GatewayPolicy, ProviderGateway, RateGate};
pub use settings::{build_provider, ProviderSettings};

/// Serialized request budget assumed when a provider does not configure one.
pub const DEFAULT_CONTEXT_BUDGET: usize = 102_400;

/// Which phase of the maker–checker pipeline a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Maker,
    Checker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Maker => f.write_str("maker"),
            Role::Checker => f.write_str("checker"),
        }
    }
}

/// Token accounting reported by providers, summed over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn absorb(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One prompt ready for dispatch.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Raw provider output. Parsing is the caller's concern.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Capability contract every vendor adapter implements. Vendors differ only
/// in auth and endpoint, which are injected through configuration.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Issue a single completion request. No retries, no rate limiting:
    /// the gateway owns both.
    async fn complete(&self, request: &CompletionRequest) -> Result<ProviderResponse>;

    /// Byte budget for one serialized batch payload.
    fn context_budget(&self) -> usize;
}

// Both supported vendors speak the OpenAI chat-completions schema, so the
// wire types live here instead of per adapter.

#[derive(Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> ChatCompletionRequest<'a> {
    pub fn from_request(model: &'a str, request: &'a CompletionRequest) -> Self {
        Self {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Deserialize)]
pub(crate) struct ChatChoiceMessage {
    pub content: String,
}

#[derive(Deserialize, Default)]
pub(crate) struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl ChatCompletionResponse {
    /// Extract the first choice's text plus usage totals.
    pub fn into_provider_response(self) -> Result<ProviderResponse> {
        let usage = self.usage.unwrap_or_default();
        let text = self
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("chat completion response contained no choices"))?;
        Ok(ProviderResponse {
            text,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        })
    }
}
