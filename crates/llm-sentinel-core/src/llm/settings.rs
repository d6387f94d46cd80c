use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::scan::ScanError;

use super::openai::OpenAiProvider;
use super::openrouter::OpenRouterProvider;
use super::{GatewayPolicy, LlmProvider};

/// Environment-driven configuration for one provider endpoint.
///
/// The maker reads `LLM_SENTINEL_*`, the checker `LLM_SENTINEL_CHECKER_*`;
/// the checker phase is enabled by setting its provider variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub provider: String,
    pub api_key: String,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub rate_limit_ms: Option<u64>,
    pub context_budget: Option<usize>,
}

const MAKER_PREFIX: &str = "LLM_SENTINEL";
const CHECKER_PREFIX: &str = "LLM_SENTINEL_CHECKER";

impl ProviderSettings {
    /// Load maker settings from the environment.
    ///
    /// * `LLM_SENTINEL_PROVIDER` — `openrouter`, `openai`, or `custom`
    ///   (default: `openrouter`).
    /// * `LLM_SENTINEL_API_KEY`  — API key/token (required).
    /// * `LLM_SENTINEL_ENDPOINT` — custom base URL (required for `custom`).
    pub fn maker_from_env() -> Result<Self, ScanError> {
        Self::from_map(MAKER_PREFIX, &std::env::vars().collect())
    }

    /// Load checker settings; `Ok(None)` when the checker is not configured.
    pub fn checker_from_env() -> Result<Option<Self>, ScanError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        if !vars.contains_key(&format!("{CHECKER_PREFIX}_PROVIDER")) {
            return Ok(None);
        }
        Self::from_map(CHECKER_PREFIX, &vars).map(Some)
    }

    fn from_map(prefix: &str, vars: &HashMap<String, String>) -> Result<Self, ScanError> {
        let get = |suffix: &str| {
            vars.get(&format!("{prefix}_{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = get("PROVIDER").unwrap_or_else(|| "openrouter".to_string());
        let api_key = get("API_KEY").ok_or_else(|| {
            ScanError::Configuration(format!(
                "{prefix}_API_KEY must be set for provider `{provider}`"
            ))
        })?;

        Ok(Self {
            provider: provider.to_lowercase(),
            api_key,
            model: get("MODEL"),
            endpoint: get("ENDPOINT"),
            timeout_secs: get("TIMEOUT_SECS").and_then(|v| v.parse().ok()),
            max_retries: get("MAX_RETRIES").and_then(|v| v.parse().ok()),
            rate_limit_ms: get("RATE_LIMIT_MS").and_then(|v| v.parse().ok()),
            context_budget: get("CONTEXT_BUDGET").and_then(|v| v.parse().ok()),
        })
    }

    /// Gateway pacing/retry policy derived from these settings.
    pub fn gateway_policy(&self) -> GatewayPolicy {
        let defaults = GatewayPolicy::default();
        GatewayPolicy {
            rate_limit: self
                .rate_limit_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.rate_limit),
            request_timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            backoff_base: defaults.backoff_base,
        }
    }
}

/// Instantiate the vendor adapter named by the settings.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, ScanError> {
    match settings.provider.as_str() {
        "openrouter" => Ok(Arc::new(OpenRouterProvider::new(settings)?)),
        "openai" => Ok(Arc::new(OpenAiProvider::new(settings)?)),
        "custom" => {
            if settings.endpoint.is_none() {
                return Err(ScanError::Configuration(
                    "custom provider requires an endpoint".to_string(),
                ));
            }
            Ok(Arc::new(OpenRouterProvider::new(settings)?))
        }
        other => Err(ScanError::Configuration(format!(
            "unknown provider `{other}` (expected openrouter, openai, or custom)"
        ))),
    }
}
