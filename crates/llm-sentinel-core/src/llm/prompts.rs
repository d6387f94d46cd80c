use std::fmt::Write;

use crate::scan::{Batch, RawFinding};

use super::CompletionRequest;

const MAKER_SYSTEM_PROMPT: &str = "You are a security expert. Return findings in JSON format only. Do not include any explanatory text before or after the JSON.";

const CHECKER_SYSTEM_PROMPT: &str = "You are a senior security auditor. Return validation results in JSON format only.";

/// Code context included in a validation prompt is capped so a checker with
/// a smaller window still sees the finding itself.
const MAX_CONTEXT_CHARS: usize = 20_000;

/// Build the maker request for one batch.
pub fn security_request(batch: &Batch) -> CompletionRequest {
    let file_list = batch
        .files
        .iter()
        .map(|f| f.path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let mut user = String::new();
    let _ = writeln!(
        user,
        "Act as a seasoned security researcher performing a source code review. \
         Identify security vulnerabilities, weaknesses, and insecure coding practices \
         (OWASP Top 10, injection, broken authentication, sensitive data exposure, \
         insufficient input validation, insecure error handling, and similar issues).\n"
    );
    let _ = writeln!(user, "Files being analyzed: {file_list}\n");
    let _ = writeln!(user, "Code to analyze:\n```\n{}\n```\n", batch.payload);
    if batch.oversized {
        let _ = writeln!(
            user,
            "This payload may exceed your context window; analyze as much of it as fits \
             and report findings for the portion you can see.\n"
        );
    }
    let _ = writeln!(
        user,
        "For each vulnerability report: the file path exactly as given in the `// File:` \
         markers, the 1-based line number within that file, a short category, a severity \
         of Critical, High, Medium, Low, or Informational, a description of the issue and \
         its impact, and step-by-step remediation guidance.\n"
    );
    let _ = writeln!(
        user,
        "IMPORTANT: return JSON only, no markdown fences, using exactly this shape:\n\
         {{\n    \"findings\": [\n        {{\n            \"file\": \"path/to/file.ext\",\n            \
         \"line\": 42,\n            \"category\": \"SQL Injection\",\n            \
         \"severity\": \"Critical|High|Medium|Low|Informational\",\n            \
         \"description\": \"what is wrong and why it matters\",\n            \
         \"remediation\": \"how to fix it\"\n        }}\n    ]\n}}"
    );

    CompletionRequest {
        system: MAKER_SYSTEM_PROMPT.to_string(),
        user,
        temperature: 0.3,
        max_tokens: 16_000,
    }
}

/// Build the checker request validating a single maker finding against the
/// code it was reported from.
pub fn validation_request(finding: &RawFinding, code_context: &str) -> CompletionRequest {
    let line = finding
        .line
        .map(|l| l.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut user = String::new();
    let _ = writeln!(
        user,
        "Act as a senior security auditor performing a second-level review of a \
         security finding. Decide whether it is a true positive or a false positive.\n"
    );
    let _ = writeln!(user, "Finding to validate:");
    let _ = writeln!(user, "Category: {}", finding.category);
    let _ = writeln!(user, "Severity: {}", finding.severity.as_str());
    let _ = writeln!(user, "File: {} (line {line})", finding.file);
    let _ = writeln!(user, "Description: {}", finding.description);
    let _ = writeln!(user, "Remediation suggested: {}\n", finding.remediation);
    let _ = writeln!(
        user,
        "Original code context:\n```\n{}\n```\n",
        truncate(code_context, MAX_CONTEXT_CHARS)
    );
    let _ = writeln!(
        user,
        "Consider whether the issue is actually exploitable here, whether mitigating \
         controls exist, and whether the severity is appropriate. Classify as \
         \"Confirmed\", \"Likely False Positive\", or \"Needs Review\" (uncertain, \
         requires human expert review).\n"
    );
    let _ = writeln!(
        user,
        "IMPORTANT: return JSON only, no markdown fences, using exactly this shape:\n\
         {{\n    \"verdict\": \"Confirmed|Likely False Positive|Needs Review\",\n    \
         \"confidence\": \"High|Medium|Low\",\n    \
         \"rationale\": \"why you reached this verdict\"\n}}"
    );

    CompletionRequest {
        system: CHECKER_SYSTEM_PROMPT.to_string(),
        user,
        temperature: 0.2,
        max_tokens: 4_000,
    }
}

fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "…"
}
