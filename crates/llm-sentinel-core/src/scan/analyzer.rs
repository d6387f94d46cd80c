use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::time::{sleep, timeout_at, Instant as TokioInstant};
use tracing::{debug, info, instrument, warn};

use crate::llm::{prompts, ProviderGateway, Role, TokenUsage};

use super::batcher::Batcher;
use super::selector::FileSelector;
use super::{parser, verdict, Batch, ResolvedFinding, ScanConfig, ScanError, ScanResult};

/// First delay before re-requesting a batch whose response failed to parse.
const PARSE_RETRY_BASE: Duration = Duration::from_secs(2);

/// Drives the full pipeline: select → batch → maker → parse → checker →
/// accumulate. Owns the concurrency bound and converts batch-scoped
/// failures into error counts instead of aborting the run.
pub struct Analyzer {
    maker: Arc<ProviderGateway>,
    checker: Option<Arc<ProviderGateway>>,
    config: ScanConfig,
}

struct BatchOutcome {
    findings: Vec<ResolvedFinding>,
    dropped: usize,
    failed: bool,
    usage: TokenUsage,
}

impl BatchOutcome {
    fn failed(usage: TokenUsage) -> Self {
        Self {
            findings: Vec::new(),
            dropped: 0,
            failed: true,
            usage,
        }
    }
}

impl Analyzer {
    pub fn new(
        maker: Arc<ProviderGateway>,
        checker: Option<Arc<ProviderGateway>>,
        config: ScanConfig,
    ) -> Self {
        Self {
            maker,
            checker,
            config,
        }
    }

    /// Run one scan. Fails only on fatal errors surfaced before dispatch;
    /// provider and parse failures reduce the result instead.
    #[instrument(name = "scan_run", skip(self, root), fields(root = %root.as_ref().display()))]
    pub async fn run(&self, root: impl AsRef<Path>) -> Result<ScanResult, ScanError> {
        let started = Instant::now();
        let selector = FileSelector::new(root.as_ref(), &self.config);
        let files = selector.select()?;
        if files.is_empty() {
            warn!("no files matched the scan configuration");
            let mut result = ScanResult::empty(&self.config.app_name);
            result.elapsed = started.elapsed();
            return Ok(result);
        }

        let content_root = selector.content_root();
        let batches = Batcher::new(self.maker.context_budget()).build(&files, &content_root);
        let batch_count = batches.len();
        info!(
            files = files.len(),
            batches = batch_count,
            checker = self.checker.is_some(),
            "scan started"
        );

        let mut result = ScanResult::empty(&self.config.app_name);
        // Selected files that failed to read were dropped during packing,
        // so metadata counts only what a provider actually saw.
        result.files_scanned = batches.iter().map(|b| b.files.len()).sum();
        result.batch_count = batch_count;

        let deadline = self.config.scan_timeout.map(|t| TokioInstant::now() + t);
        let mut completed = 0usize;
        {
            let mut outcomes = stream::iter(batches.into_iter().map(|batch| self.process_batch(batch)))
                .buffer_unordered(self.config.max_workers.max(1));

            loop {
                let next = match deadline {
                    Some(at) => match timeout_at(at, outcomes.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!("scan deadline reached, abandoning unfinished batches");
                            break;
                        }
                    },
                    None => outcomes.next().await,
                };
                let Some(outcome) = next else { break };
                completed += 1;
                if outcome.failed {
                    result.error_count += 1;
                }
                result.dropped_entries += outcome.dropped;
                result.usage.absorb(outcome.usage);
                // Within a batch, findings keep provider order; order across
                // batches follows completion and is deliberately unspecified.
                result.findings.extend(outcome.findings);
            }
        }
        result.error_count += batch_count - completed;
        result.elapsed = started.elapsed();

        info!(
            findings = result.findings.len(),
            errors = result.error_count,
            dropped = result.dropped_entries,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "scan complete"
        );
        Ok(result)
    }

    async fn process_batch(&self, batch: Batch) -> BatchOutcome {
        let mut usage = TokenUsage::default();
        let request = prompts::security_request(&batch);

        let mut backoff = PARSE_RETRY_BASE;
        let mut parse_attempt = 0u32;
        let parsed = loop {
            let response = match self.maker.analyze(&request, Role::Maker).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(batch = batch.index, error = %err, "maker call failed, batch contributes no findings");
                    return BatchOutcome::failed(usage);
                }
            };
            usage.absorb(response.usage);
            match parser::parse_findings(&response.text) {
                Ok(parsed) => break parsed,
                Err(err) if parse_attempt < self.config.parse_retries => {
                    parse_attempt += 1;
                    warn!(
                        batch = batch.index,
                        attempt = parse_attempt,
                        error = %err,
                        "unparseable maker response, re-requesting batch"
                    );
                    sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => {
                    warn!(batch = batch.index, error = %err, "maker response unusable after retries");
                    return BatchOutcome::failed(usage);
                }
            }
        };
        debug!(
            batch = batch.index,
            findings = parsed.findings.len(),
            dropped = parsed.dropped,
            "batch analyzed"
        );

        let mut findings = Vec::with_capacity(parsed.findings.len());
        for finding in parsed.findings {
            let verdict = match &self.checker {
                None => None,
                Some(checker) => {
                    let request = prompts::validation_request(&finding, &batch.payload);
                    let outcome = match checker.analyze(&request, Role::Checker).await {
                        Ok(response) => {
                            usage.absorb(response.usage);
                            parser::parse_verdict(&response.text)
                        }
                        Err(err) => Err(err),
                    };
                    Some(verdict::resolve(outcome))
                }
            };
            findings.push(ResolvedFinding { finding, verdict });
        }

        BatchOutcome {
            findings,
            dropped: parsed.dropped,
            failed: false,
            usage,
        }
    }
}
