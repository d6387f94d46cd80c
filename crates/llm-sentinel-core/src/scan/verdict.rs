use tracing::warn;

use super::{Confidence, ScanError, Verdict, VerdictStatus};

/// Apply the maker–checker decision protocol to one checker outcome.
///
/// Explicit Confirmed and LikelyFalsePositive verdicts pass through.
/// Everything else — a NeedsReview label, an unparseable response, or a
/// checker call that failed outright — resolves to NeedsReview so that
/// uncertainty is never silently promoted to Confirmed or discarded.
pub fn resolve(outcome: Result<Verdict, ScanError>) -> Verdict {
    match outcome {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(error = %err, "checker outcome unavailable, defaulting to NeedsReview");
            Verdict {
                status: VerdictStatus::NeedsReview,
                confidence: Confidence::Low,
                rationale: format!("Validation failed: {err}"),
            }
        }
    }
}
