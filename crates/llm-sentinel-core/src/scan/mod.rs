use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{Role, TokenUsage};

pub mod analyzer;
pub mod batcher;
pub mod parser;
pub mod selector;
pub mod verdict;

/// Ordinal severity scale used for report sorting. Not a CVSS score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Informational,
}

impl Severity {
    /// Parse the severity label emitted by a provider, tolerating case drift.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "informational" | "info" => Some(Self::Informational),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Informational => "Informational",
        }
    }
}

/// Checker's classification of a maker finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictStatus {
    Confirmed,
    #[serde(rename = "Likely False Positive")]
    LikelyFalsePositive,
    #[serde(rename = "Needs Review")]
    NeedsReview,
}

impl VerdictStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Some(Self::Confirmed),
            "likely false positive" => Some(Self::LikelyFalsePositive),
            "needs review" => Some(Self::NeedsReview),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "Confirmed",
            Self::LikelyFalsePositive => "Likely False Positive",
            Self::NeedsReview => "Needs Review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Outcome of the checker pass for a single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub confidence: Confidence,
    pub rationale: String,
}

/// Unvalidated claim produced by the maker, as parsed from its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFinding {
    /// Path relative to the scan root, best effort as reported.
    pub file: String,
    /// 1-based line number when the provider supplied one.
    pub line: Option<u32>,
    pub category: String,
    pub severity: Severity,
    pub description: String,
    pub remediation: String,
}

/// A maker finding plus the checker verdict, when the checker ran.
///
/// This is the canonical unit every serialized report must round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFinding {
    #[serde(flatten)]
    pub finding: RawFinding,
    pub verdict: Option<Verdict>,
}

impl ResolvedFinding {
    /// Whether this finding counts toward the non-zero exit status.
    ///
    /// Unverified findings (checker disabled) and NeedsReview findings are
    /// always reportable; only an explicit LikelyFalsePositive suppresses one.
    pub fn is_reportable(&self) -> bool {
        match &self.verdict {
            None => true,
            Some(v) => v.status != VerdictStatus::LikelyFalsePositive,
        }
    }
}

/// A file that passed selection. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    /// Path relative to the scan root.
    pub path: PathBuf,
    pub size: u64,
    pub language: Option<&'static str>,
}

/// A bounded group of file contents sent to a provider in one request.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub files: Vec<SourceFile>,
    /// File contents concatenated with `// File:` boundary markers.
    pub payload: String,
    pub payload_size: usize,
    /// Set when a single file exceeded the context budget on its own.
    pub oversized: bool,
}

/// Aggregate result of one scan run. Append-only during the run, immutable
/// once handed to report consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub app_name: String,
    pub findings: Vec<ResolvedFinding>,
    /// Files whose contents were packed into batches and dispatched.
    pub files_scanned: usize,
    pub batch_count: usize,
    /// Batches lost to provider or parse failures, plus batches abandoned
    /// when the scan deadline fired.
    pub error_count: usize,
    /// Individual malformed entries dropped during response parsing.
    pub dropped_entries: usize,
    pub elapsed: Duration,
    pub usage: TokenUsage,
}

impl ScanResult {
    pub fn empty(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            findings: Vec::new(),
            files_scanned: 0,
            batch_count: 0,
            error_count: 0,
            dropped_entries: 0,
            elapsed: Duration::ZERO,
            usage: TokenUsage::default(),
        }
    }

    pub fn has_reportable_findings(&self) -> bool {
        self.findings.iter().any(ResolvedFinding::is_reportable)
    }

    /// Count of findings per severity band.
    pub fn severity_stats(&self) -> BTreeMap<Severity, usize> {
        let mut stats = BTreeMap::new();
        for finding in &self.findings {
            *stats.entry(finding.finding.severity).or_insert(0) += 1;
        }
        stats
    }
}

/// Tunable scan parameters. Defaults mirror a 1 MiB file cap and ten
/// concurrent workers.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub app_name: String,
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_workers: usize,
    /// Re-requests allowed after an unparseable maker response.
    pub parse_retries: u32,
    /// Overall deadline; in-flight work past it is abandoned, accumulated
    /// findings are kept.
    pub scan_timeout: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            app_name: "Application".to_string(),
            max_file_size: 1_048_576,
            allowed_extensions: [
                "py", "js", "jsx", "ts", "tsx", "java", "go", "rb", "php", "cs", "cpp", "c", "h",
                "hpp", "rs",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exclude_patterns: [
                ".git",
                "__pycache__",
                "node_modules",
                ".venv",
                "venv",
                "target",
                "*.min.js",
                "*.min.css",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_workers: 10,
            parse_retries: 2,
            scan_timeout: None,
        }
    }
}

/// Error taxonomy for the scan pipeline.
///
/// `InputNotFound` and `Configuration` are fatal before any batch is
/// dispatched; `Provider` and `JsonParse` are batch-scoped and converted
/// into error counts by the analyzer.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("input path not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{role} provider failed after {attempts} attempt(s): {message}")]
    Provider {
        role: Role,
        attempts: u32,
        message: String,
    },

    #[error("unparseable LLM response: {0}")]
    JsonParse(String),
}
