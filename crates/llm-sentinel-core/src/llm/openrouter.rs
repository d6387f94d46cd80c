use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::scan::ScanError;

use super::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, LlmProvider,
    ProviderResponse, ProviderSettings, DEFAULT_CONTEXT_BUDGET,
};

/// OpenRouter chat-completions adapter. Also serves custom providers that
/// expose the same schema under a different base URL.
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    http: Client,
    url: String,
    api_key: String,
    model: String,
    context_budget: usize,
}

impl OpenRouterProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ScanError> {
        if settings.api_key.trim().is_empty() {
            return Err(ScanError::Configuration(
                "OpenRouter API key must not be blank".to_string(),
            ));
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string());
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("llm-sentinel/0.3")
            .build()
            .map_err(|err| {
                ScanError::Configuration(format!("failed to build OpenRouter HTTP client: {err}"))
            })?;
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| "anthropic/claude-3-haiku".to_string()),
            context_budget: settings.context_budget.unwrap_or(DEFAULT_CONTEXT_BUDGET),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<ProviderResponse> {
        let payload = ChatCompletionRequest::from_request(&self.model, request);
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "LLM Sentinel Security Scanner")
            .json(&payload)
            .send()
            .await
            .context("failed to call OpenRouter chat completions API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OpenRouter API error ({status}): {body}");
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to parse OpenRouter response")?;
        completion.into_provider_response()
    }

    fn context_budget(&self) -> usize {
        self.context_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(url: String) -> ProviderSettings {
        ProviderSettings {
            provider: "openrouter".into(),
            api_key: "test-key".into(),
            model: Some("test-model".into()),
            endpoint: Some(url),
            timeout_secs: Some(5),
            max_retries: None,
            rate_limit_ms: None,
            context_budget: Some(4096),
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "You are a security expert.".into(),
            user: "analyze this".into(),
            temperature: 0.3,
            max_tokens: 256,
        }
    }

    #[test]
    fn blank_api_key_is_rejected() {
        let mut s = settings("http://localhost".into());
        s.api_key = "  ".into();
        assert!(OpenRouterProvider::new(&s).is_err());
    }

    #[test]
    fn endpoint_override_replaces_default_base() {
        let provider = OpenRouterProvider::new(&settings("http://example.test/v1/".into())).unwrap();
        assert_eq!(provider.url, "http://example.test/v1/chat/completions");
        assert_eq!(provider.context_budget(), 4096);
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn complete_parses_successful_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"content":"{\"findings\":[]}"}}],"usage":{"prompt_tokens":12,"completion_tokens":4}}"#);
        });

        let provider = OpenRouterProvider::new(&settings(server.base_url())).unwrap();
        let response = provider.complete(&request()).await.unwrap();
        assert_eq!(response.text, "{\"findings\":[]}");
        assert_eq!(response.usage.completion_tokens, 4);
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).body("rate limited");
        });

        let provider = OpenRouterProvider::new(&settings(server.base_url())).unwrap();
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("OpenRouter API error"));
    }
}
