use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::scan::ScanError;

use super::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, LlmProvider,
    ProviderResponse, ProviderSettings, DEFAULT_CONTEXT_BUDGET,
};

/// OpenAI chat-completions adapter.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: Client,
    url: String,
    api_key: String,
    model: String,
    context_budget: usize,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ScanError> {
        if settings.api_key.trim().is_empty() {
            return Err(ScanError::Configuration(
                "OpenAI API key must not be blank".to_string(),
            ));
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("llm-sentinel/0.3")
            .build()
            .map_err(|err| {
                ScanError::Configuration(format!("failed to build OpenAI HTTP client: {err}"))
            })?;
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            context_budget: settings.context_budget.unwrap_or(DEFAULT_CONTEXT_BUDGET),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<ProviderResponse> {
        let payload = ChatCompletionRequest::from_request(&self.model, request);
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("failed to call OpenAI chat completions API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OpenAI API error ({status}): {body}");
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to parse OpenAI response")?;
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
            provider: "openai".into(),
            api_key: "test-key".into(),
            model: None,
            endpoint: Some(url),
            timeout_secs: Some(5),
            max_retries: None,
            rate_limit_ms: None,
            context_budget: None,
        }
    }

    #[test]
    fn defaults_model_and_budget() {
        let provider = OpenAiProvider::new(&settings("http://localhost/v1".into())).unwrap();
        assert_eq!(provider.model, "gpt-4o-mini");
        assert_eq!(provider.context_budget(), DEFAULT_CONTEXT_BUDGET);
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn complete_round_trips_through_mock_server() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"content":"{\"verdict\":\"Confirmed\",\"confidence\":\"High\",\"rationale\":\"ok\"}"}}]}"#);
        });

        let provider = OpenAiProvider::new(&settings(server.base_url())).unwrap();
        let response = provider
            .complete(&CompletionRequest {
                system: "auditor".into(),
                user: "validate".into(),
                temperature: 0.2,
                max_tokens: 128,
            })
            .await
            .unwrap();
        assert!(response.text.contains("Confirmed"));
        mock.assert();
    }
}
