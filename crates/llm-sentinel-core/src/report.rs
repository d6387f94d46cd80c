use std::fmt::Write;

use serde::Serialize;

use crate::llm::TokenUsage;
use crate::scan::{ResolvedFinding, ScanResult, Severity};

/// Format styles supported in default report implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => anyhow::bail!("unknown output format: {other}"),
        }
    }
}

/// Produce a report string from a `ScanResult` using the desired format.
///
/// Findings are presented sorted by severity then file path; the order in
/// which batches completed never leaks into the output.
pub fn render_report(result: &ScanResult, format: OutputFormat) -> anyhow::Result<String> {
    let findings = sorted_findings(result);
    match format {
        OutputFormat::Human => render_human(result, &findings),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&JsonReport::new(
            result, &findings,
        ))?),
        OutputFormat::Csv => render_csv(&findings),
    }
}

fn sorted_findings(result: &ScanResult) -> Vec<&ResolvedFinding> {
    let mut findings: Vec<&ResolvedFinding> = result.findings.iter().collect();
    findings.sort_by(|a, b| {
        a.finding
            .severity
            .cmp(&b.finding.severity)
            .then_with(|| a.finding.file.cmp(&b.finding.file))
            .then_with(|| a.finding.line.cmp(&b.finding.line))
    });
    findings
}

fn render_human(result: &ScanResult, findings: &[&ResolvedFinding]) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Security Scan Report: {}", result.app_name)?;
    writeln!(
        out,
        "Files scanned: {} in {} batch(es), {:.1}s elapsed",
        result.files_scanned,
        result.batch_count,
        result.elapsed.as_secs_f64()
    )?;
    if result.error_count > 0 || result.dropped_entries > 0 {
        writeln!(
            out,
            "Incomplete: {} batch(es) failed, {} malformed finding(s) dropped",
            result.error_count, result.dropped_entries
        )?;
    }
    writeln!(out)?;

    if findings.is_empty() {
        writeln!(out, "No findings detected.")?;
        return Ok(out);
    }

    writeln!(out, "Findings by severity:")?;
    for (severity, count) in result.severity_stats() {
        writeln!(out, "  {:>13}: {count}", severity.as_str())?;
    }
    writeln!(out)?;

    for finding in findings {
        let location = match finding.finding.line {
            Some(line) => format!("{}:{line}", finding.finding.file),
            None => finding.finding.file.clone(),
        };
        writeln!(
            out,
            "[{}] {} @ {location}",
            finding.finding.severity.as_str(),
            finding.finding.category
        )?;
        writeln!(out, "  {}", single_line(&finding.finding.description))?;
        if !finding.finding.remediation.is_empty() {
            writeln!(out, "  Remediation: {}", single_line(&finding.finding.remediation))?;
        }
        match &finding.verdict {
            Some(verdict) => {
                writeln!(
                    out,
                    "  Verdict: {} ({:?} confidence) - {}",
                    verdict.status.as_str(),
                    verdict.confidence,
                    single_line(&verdict.rationale)
                )?;
            }
            None => writeln!(out, "  Verdict: not validated")?,
        }
        writeln!(out)?;
    }

    if result.usage.total() > 0 {
        writeln!(
            out,
            "Token usage: {} prompt + {} completion",
            result.usage.prompt_tokens, result.usage.completion_tokens
        )?;
    }
    Ok(out)
}

fn render_csv(findings: &[&ResolvedFinding]) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "file,line,severity,category,description,remediation,verdict,confidence"
    )?;
    for finding in findings {
        let line = finding
            .finding
            .line
            .map(|l| l.to_string())
            .unwrap_or_default();
        let (verdict, confidence) = match &finding.verdict {
            Some(v) => (v.status.as_str().to_string(), format!("{:?}", v.confidence)),
            None => (String::new(), String::new()),
        };
        writeln!(
            out,
            "{},{line},{},{},{},{},{verdict},{confidence}",
            csv_field(&finding.finding.file),
            finding.finding.severity.as_str(),
            csv_field(&finding.finding.category),
            csv_field(&finding.finding.description),
            csv_field(&finding.finding.remediation),
        )?;
    }
    Ok(out)
}

/// Quote a field when it contains a delimiter, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn single_line(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    app_name: &'a str,
    files_scanned: usize,
    batch_count: usize,
    error_count: usize,
    dropped_entries: usize,
    elapsed_secs: f64,
    severity_stats: Vec<SeverityCount>,
    findings: Vec<&'a ResolvedFinding>,
    usage: &'a TokenUsage,
}

#[derive(Debug, Serialize)]
struct SeverityCount {
    severity: Severity,
    count: usize,
}

impl<'a> JsonReport<'a> {
    fn new(result: &'a ScanResult, findings: &[&'a ResolvedFinding]) -> Self {
        Self {
            app_name: &result.app_name,
            files_scanned: result.files_scanned,
            batch_count: result.batch_count,
            error_count: result.error_count,
            dropped_entries: result.dropped_entries,
            elapsed_secs: result.elapsed.as_secs_f64(),
            severity_stats: result
                .severity_stats()
                .into_iter()
                .map(|(severity, count)| SeverityCount { severity, count })
                .collect(),
            findings: findings.to_vec(),
            usage: &result.usage,
        }
    }
}
