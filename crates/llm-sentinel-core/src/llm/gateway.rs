use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::scan::ScanError;

use super::{CompletionRequest, LlmProvider, ProviderResponse, Role};

/// Retry and pacing policy applied by a [`ProviderGateway`].
#[derive(Debug, Clone)]
pub struct GatewayPolicy {
    /// Minimum delay between requests, measured from the end of the
    /// previous call through the shared gate.
    pub rate_limit: Duration,
    /// Hard cap on a single request.
    pub request_timeout: Duration,
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// First backoff delay; doubles each attempt.
    pub backoff_base: Duration,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Mutually-exclusive gate timestamp: the later of the last claimed
/// dispatch slot and the last finished call.
///
/// [`pause`](Self::pause) holds the lock across its wait and claims the
/// dispatch slot before releasing, so concurrent callers queue on the
/// lock and start at least the minimum delay apart. One gate per gateway
/// instance by default; share one gate across gateways that use the same
/// provider credential to get a single global rate limit for that
/// credential.
#[derive(Debug, Default)]
pub struct RateGate {
    stamp: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until at least `min_delay` has passed since the gate's
    /// timestamp, then claim the next dispatch slot.
    async fn pause(&self, min_delay: Duration) {
        if min_delay.is_zero() {
            return;
        }
        let mut stamp = self.stamp.lock().await;
        if let Some(at) = *stamp {
            let since = at.elapsed();
            if since < min_delay {
                sleep(min_delay - since).await;
            }
        }
        *stamp = Some(Instant::now());
    }

    /// Move the gate timestamp to the end of a finished call, never
    /// backwards past a slot already claimed by a waiting caller.
    async fn mark(&self) {
        let mut stamp = self.stamp.lock().await;
        let now = Instant::now();
        if stamp.map_or(true, |at| at < now) {
            *stamp = Some(now);
        }
    }
}

/// Uniform front door to a maker or checker endpoint: pacing, bounded
/// timeout, and retry with exponential backoff. Never parses responses.
pub struct ProviderGateway {
    provider: Arc<dyn LlmProvider>,
    policy: GatewayPolicy,
    gate: Arc<RateGate>,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, policy: GatewayPolicy) -> Self {
        Self {
            provider,
            policy,
            gate: Arc::new(RateGate::new()),
        }
    }

    /// Build a gateway that shares its rate gate with other gateways,
    /// serializing all of them through one minimum-delay gate.
    pub fn with_shared_gate(
        provider: Arc<dyn LlmProvider>,
        policy: GatewayPolicy,
        gate: Arc<RateGate>,
    ) -> Self {
        Self {
            provider,
            policy,
            gate,
        }
    }

    pub fn context_budget(&self) -> usize {
        self.provider.context_budget()
    }

    /// Dispatch one prompt, retrying transport failures and timeouts up to
    /// the policy's limit before surfacing a provider error.
    pub async fn analyze(
        &self,
        request: &CompletionRequest,
        role: Role,
    ) -> Result<ProviderResponse, ScanError> {
        let mut backoff = self.policy.backoff_base;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.gate.pause(self.policy.rate_limit).await;
            let outcome = timeout(self.policy.request_timeout, self.provider.complete(request))
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "request timed out after {:?}",
                        self.policy.request_timeout
                    )
                })
                .and_then(|result| result);
            self.gate.mark().await;

            match outcome {
                Ok(response) => {
                    debug!(%role, attempt, tokens = response.usage.total(), "provider call succeeded");
                    return Ok(response);
                }
                Err(err) if attempt <= self.policy.max_retries => {
                    warn!(%role, attempt, error = %err, "provider call failed, backing off");
                    sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => {
                    return Err(ScanError::Provider {
                        role,
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}
