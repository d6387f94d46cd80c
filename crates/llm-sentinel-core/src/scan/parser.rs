use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::{Confidence, RawFinding, ScanError, Severity, Verdict, VerdictStatus};

/// Findings recovered from one maker response, plus the count of entries
/// dropped for missing/invalid required fields.
#[derive(Debug, Default)]
pub struct ParsedFindings {
    pub findings: Vec<RawFinding>,
    pub dropped: usize,
}

static FINDINGS_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\{.*"findings".*\}"#).expect("findings span pattern"));
static VERDICT_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\{.*"verdict".*\}"#).expect("verdict span pattern"));

/// Parse a maker response into findings.
///
/// Tolerates markdown fences, JSON embedded in prose, and truncated JSON
/// (structural repair). A malformed entry is dropped and counted without
/// discarding the rest of the batch result.
pub fn parse_findings(raw: &str) -> Result<ParsedFindings, ScanError> {
    let value = extract_json(raw, &FINDINGS_SPAN)?;
    let items = value
        .get("findings")
        .and_then(Value::as_array)
        .ok_or_else(|| ScanError::JsonParse("response has no `findings` array".to_string()))?;

    let mut parsed = ParsedFindings::default();
    for (index, item) in items.iter().enumerate() {
        match finding_from_value(item) {
            Some(finding) => parsed.findings.push(finding),
            None => {
                warn!(index, "dropping finding entry with missing or invalid fields");
                parsed.dropped += 1;
            }
        }
    }
    Ok(parsed)
}

/// Parse a checker response into a verdict. A verdict outside the fixed
/// set is a parse error; the caller's resolver turns that into NeedsReview.
pub fn parse_verdict(raw: &str) -> Result<Verdict, ScanError> {
    let value = extract_json(raw, &VERDICT_SPAN)?;
    let label = value
        .get("verdict")
        .and_then(Value::as_str)
        .ok_or_else(|| ScanError::JsonParse("response has no `verdict` field".to_string()))?;
    let status = VerdictStatus::parse(label)
        .ok_or_else(|| ScanError::JsonParse(format!("unexpected verdict `{label}`")))?;
    let confidence = value
        .get("confidence")
        .and_then(Value::as_str)
        .and_then(Confidence::parse)
        .unwrap_or(Confidence::Low);
    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or("No rationale provided")
        .to_string();
    Ok(Verdict {
        status,
        confidence,
        rationale,
    })
}

fn finding_from_value(value: &Value) -> Option<RawFinding> {
    let obj = value.as_object()?;
    let file = string_field(obj, &["file", "file_path"])?;
    let category = string_field(obj, &["category", "title"])?;
    let severity = Severity::parse(&string_field(obj, &["severity"])?)?;
    let description = string_field(obj, &["description"])?;
    let remediation = string_field(obj, &["remediation"]).unwrap_or_default();
    let line = obj
        .get("line")
        .or_else(|| obj.get("line_number"))
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        })
        .map(|l| l as u32);
    Some(RawFinding {
        file,
        line,
        category,
        severity,
        description,
        remediation,
    })
}

fn string_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extract_json(raw: &str, span: &Regex) -> Result<Value, ScanError> {
    let content = strip_code_fences(raw);
    let candidate = if content.trim_start().starts_with('{') {
        content.trim().to_string()
    } else {
        span.find(&content)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ScanError::JsonParse("no JSON object found in response".to_string()))?
    };

    match serde_json::from_str(&candidate) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let repaired = repair_truncated(&candidate);
            serde_json::from_str(&repaired)
                .map_err(|_| ScanError::JsonParse(format!("invalid JSON after repair: {first_err}")))
        }
    }
}

fn strip_code_fences(raw: &str) -> String {
    let mut content = raw.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim().to_string()
}

enum Ctx {
    Obj { after_colon: bool },
    Arr,
}

/// Close a JSON document truncated mid-stream: terminate an unfinished
/// string, drop dangling separators, supply `null` for a missing value,
/// then close every open bracket and brace in nesting order.
fn repair_truncated(input: &str) -> String {
    let mut stack: Vec<Ctx> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut string_is_key = false;

    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                string_is_key = matches!(stack.last(), Some(Ctx::Obj { after_colon: false }));
            }
            '{' => stack.push(Ctx::Obj { after_colon: false }),
            '[' => stack.push(Ctx::Arr),
            '}' | ']' => {
                stack.pop();
            }
            ':' => {
                if let Some(Ctx::Obj { after_colon }) = stack.last_mut() {
                    *after_colon = true;
                }
            }
            ',' => {
                if let Some(Ctx::Obj { after_colon }) = stack.last_mut() {
                    *after_colon = false;
                }
            }
            _ => {}
        }
    }

    let mut out = input.trim_end().to_string();
    if in_string {
        out.push('"');
        if string_is_key {
            out.push_str(": null");
        }
    } else {
        while out.ends_with(',') {
            out.pop();
            out.truncate(out.trim_end().len());
        }
        if out.ends_with(':') {
            out.push_str(" null");
        } else if out.ends_with('"')
            && matches!(stack.last(), Some(Ctx::Obj { after_colon: false }))
        {
            // A key string completed, but its value never started.
            out.push_str(": null");
        }
    }
    for ctx in stack.iter().rev() {
        out.push(match ctx {
            Ctx::Obj { .. } => '}',
            Ctx::Arr => ']',
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = r#"{
        "findings": [
            {
                "file": "src/login.py",
                "line": 18,
                "category": "Hardcoded Credentials",
                "severity": "High",
                "description": "password literal in source",
                "remediation": "load secrets from the environment"
            },
            {
                "file": "src/db.py",
                "line": 42,
                "category": "SQL Injection",
                "severity": "Critical",
                "description": "query built by string concatenation",
                "remediation": "use parameterized queries"
            }
        ]
    }"#;

    #[test]
    fn parses_well_formed_findings() {
        let parsed = parse_findings(WELL_FORMED).unwrap();
        assert_eq!(parsed.findings.len(), 2);
        assert_eq!(parsed.dropped, 0);
        assert_eq!(parsed.findings[0].file, "src/login.py");
        assert_eq!(parsed.findings[1].severity, Severity::Critical);
        assert_eq!(parsed.findings[1].line, Some(42));
    }

    #[test]
    fn parsing_is_idempotent() {
        let first = parse_findings(WELL_FORMED).unwrap();
        let second = parse_findings(WELL_FORMED).unwrap();
        assert_eq!(first.findings, second.findings);
        assert_eq!(first.dropped, second.dropped);
    }

    #[test]
    fn strips_markdown_fences() {
        let fenced = format!("```json\n{WELL_FORMED}\n```");
        let parsed = parse_findings(&fenced).unwrap();
        assert_eq!(parsed.findings.len(), 2);
    }

    #[test]
    fn extracts_json_embedded_in_prose() {
        let wrapped = format!(
            "Here is my security analysis of the provided code.\n\n{WELL_FORMED}\n\nLet me know if you need more detail."
        );
        let parsed = parse_findings(&wrapped).unwrap();
        assert_eq!(parsed.findings.len(), 2);
    }

    #[test]
    fn one_malformed_entry_never_discards_the_rest() {
        let mixed = r#"{
            "findings": [
                {"file": "a.py", "category": "XSS", "severity": "Medium", "description": "ok", "remediation": "escape"},
                {"file": "b.py", "category": "XSS", "description": "missing severity", "remediation": "escape"},
                {"file": "c.py", "category": "XSS", "severity": "Low", "description": "ok", "remediation": "escape"}
            ]
        }"#;
        let parsed = parse_findings(mixed).unwrap();
        assert_eq!(parsed.findings.len(), 2);
        assert_eq!(parsed.dropped, 1);
    }

    #[test]
    fn unknown_severity_drops_only_that_entry() {
        let mixed = r#"{
            "findings": [
                {"file": "a.py", "category": "XSS", "severity": "Catastrophic", "description": "x", "remediation": "y"},
                {"file": "b.py", "category": "XSS", "severity": "Low", "description": "x", "remediation": "y"}
            ]
        }"#;
        let parsed = parse_findings(mixed).unwrap();
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.dropped, 1);
    }

    #[test]
    fn truncated_response_recovers_complete_leading_objects() {
        // Cut mid-way through the second object's severity string.
        let truncated = r#"{
            "findings": [
                {"file": "a.py", "line": 3, "category": "XSS", "severity": "High", "description": "reflected input", "remediation": "escape output"},
                {"file": "b.py", "line": 9, "category": "SSRF", "severity": "Crit"#;
        let parsed = parse_findings(truncated).unwrap();
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].file, "a.py");
        assert_eq!(parsed.dropped, 1);
    }

    #[test]
    fn truncated_after_key_repairs_to_null_value() {
        let truncated = r#"{"findings": [{"file": "a.py", "category": "XSS", "severity": "High", "description": "ok", "remediation""#;
        let parsed = parse_findings(truncated).unwrap();
        // Remediation is optional, so the entry survives with it defaulted.
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].remediation, "");
    }

    #[test]
    fn hopeless_output_is_a_parse_error() {
        let err = parse_findings("I could not analyze this code, sorry!").unwrap_err();
        assert!(matches!(err, ScanError::JsonParse(_)));
    }

    #[test]
    fn findings_value_of_wrong_type_is_a_parse_error() {
        let err = parse_findings(r#"{"findings": "none"}"#).unwrap_err();
        assert!(matches!(err, ScanError::JsonParse(_)));
    }

    #[test]
    fn accepts_alternate_field_spellings() {
        let alt = r#"{
            "findings": [
                {"file_path": "a.py", "line_number": "7", "title": "Weak Hash", "severity": "low", "description": "md5", "remediation": "use sha-256"}
            ]
        }"#;
        let parsed = parse_findings(alt).unwrap();
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].file, "a.py");
        assert_eq!(parsed.findings[0].line, Some(7));
        assert_eq!(parsed.findings[0].category, "Weak Hash");
        assert_eq!(parsed.findings[0].severity, Severity::Low);
    }

    #[test]
    fn parses_verdict_with_confidence() {
        let raw = r#"{"verdict": "Confirmed", "confidence": "High", "rationale": "exploitable as written"}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.status, VerdictStatus::Confirmed);
        assert_eq!(verdict.confidence, Confidence::High);
        assert_eq!(verdict.rationale, "exploitable as written");
    }

    #[test]
    fn verdict_outside_fixed_set_is_a_parse_error() {
        let err = parse_verdict(r#"{"verdict": "Probably Fine"}"#).unwrap_err();
        assert!(matches!(err, ScanError::JsonParse(_)));
    }

    #[test]
    fn verdict_defaults_confidence_and_rationale() {
        let verdict = parse_verdict(r#"{"verdict": "Likely False Positive"}"#).unwrap();
        assert_eq!(verdict.status, VerdictStatus::LikelyFalsePositive);
        assert_eq!(verdict.confidence, Confidence::Low);
        assert_eq!(verdict.rationale, "No rationale provided");
    }

    #[test]
    fn verdict_embedded_in_prose_is_extracted() {
        let raw = "After careful review:\n{\"verdict\": \"Needs Review\", \"confidence\": \"Medium\", \"rationale\": \"context missing\"}\nThanks.";
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.status, VerdictStatus::NeedsReview);
    }

    #[test]
    fn repair_closes_nested_structures_in_order() {
        let repaired = repair_truncated(r#"{"findings": [{"file": "a.py", "evidence": [{"code": "x"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert!(value.get("findings").is_some());
    }

    #[test]
    fn repair_drops_dangling_comma() {
        let repaired = repair_truncated(r#"{"findings": [{"file": "a.py"},"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["findings"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn repair_supplies_null_for_missing_value() {
        let repaired = repair_truncated(r#"{"findings": [{"file": "a.py", "line":"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert!(value["findings"][0]["line"].is_null());
    }

    #[test]
    fn repair_leaves_valid_json_unchanged() {
        let valid = r#"{"findings": []}"#;
        assert_eq!(repair_truncated(valid), valid);
    }
}
