//! Validation and normalization of the analysis provider's reply.
//!
//! The provider is asked for pure JSON but replies are treated as hostile
//! input: the JSON payload is extracted out of any surrounding prose or
//! code fences, every field is checked against the expected schema, and
//! minor deviations are repaired through a small canonical mapping.
//! Anything that cannot be repaired fails with
//! [`PipelineError::MalformedAnalysisResponse`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::PipelineError;
use crate::report::{
    ChangeKind, Issue, IssueLocation, Redline, RedlineOrigin, Severity, Suggestion,
    ValidatedAnalysis,
};

/// Locate the JSON object in a possibly prose-wrapped reply.
///
/// Prefers the body of a ```json fence when one is present, otherwise the
/// first balanced `{…}` object (string-aware, so braces inside string
/// values do not confuse the scan).
pub fn extract_json(reply: &str) -> Option<&str> {
    if let Some(fence_start) = reply.find("```json") {
        let body = &reply[fence_start + "```json".len()..];
        if let Some(fence_end) = body.find("```") {
            let inner = body[..fence_end].trim();
            if !inner.is_empty() {
                return Some(inner);
            }
        }
    }
    first_balanced_object(reply)
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Canonical severity mapping for provider deviations. Case-insensitive;
/// unknown values are a validation failure, not a guess.
pub fn canonical_severity(raw: &str) -> Option<Severity> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "critical" | "blocker" | "severe" => Some(Severity::Critical),
        "high" | "major" | "serious" => Some(Severity::High),
        "medium" | "moderate" | "warning" => Some(Severity::Medium),
        "low" | "minor" => Some(Severity::Low),
        "info" | "informational" | "note" | "notice" => Some(Severity::Info),
        _ => None,
    }
}

fn canonical_change_kind(raw: &str) -> Option<ChangeKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "insertion" | "insert" | "inserted" | "addition" | "added" => Some(ChangeKind::Insertion),
        "deletion" | "delete" | "deleted" | "removal" | "removed" => Some(ChangeKind::Deletion),
        "modification" | "modify" | "modified" | "change" | "changed" => {
            Some(ChangeKind::Modification)
        }
        _ => None,
    }
}

fn malformed(context: &str) -> PipelineError {
    PipelineError::MalformedAnalysisResponse(context.to_string())
}

/// Integer coercion: accepts JSON numbers and numeric strings.
fn coerce_integer(value: &Value, field: &str) -> Result<i64, PipelineError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| malformed(&format!("field '{field}' is not an integer"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| malformed(&format!("field '{field}' is not an integer"))),
        _ => Err(malformed(&format!("field '{field}' is not an integer"))),
    }
}

fn required_str<'a>(object: &'a Value, field: &str) -> Result<&'a str, PipelineError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(&format!("missing string field '{field}'")))
}

fn optional_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object.get(field).and_then(Value::as_str)
}

fn parse_issue(value: &Value, position: usize) -> Result<Issue, PipelineError> {
    if !value.is_object() {
        return Err(malformed(&format!("issues[{position}] is not an object")));
    }
    let severity_raw = required_str(value, "severity")?;
    let severity = canonical_severity(severity_raw)
        .ok_or_else(|| malformed(&format!("unknown severity '{severity_raw}'")))?;

    let location = value
        .get("location")
        .ok_or_else(|| malformed(&format!("issues[{position}] has no location")))?;
    let paragraph = coerce_integer(
        location
            .get("paragraph")
            .ok_or_else(|| malformed(&format!("issues[{position}] location has no paragraph")))?,
        "location.paragraph",
    )?;
    if paragraph < 0 {
        return Err(malformed(&format!(
            "issues[{position}] paragraph index is negative"
        )));
    }

    Ok(Issue {
        kind: required_str(value, "type")?.to_string(),
        severity,
        description: required_str(value, "description")?.to_string(),
        location: IssueLocation {
            paragraph: paragraph as usize,
            text: optional_str(location, "text").unwrap_or_default().to_string(),
        },
        suggestion: optional_str(value, "suggestion").unwrap_or_default().to_string(),
    })
}

fn parse_suggestion(value: &Value, position: usize) -> Result<Suggestion, PipelineError> {
    if !value.is_object() {
        return Err(malformed(&format!(
            "suggestions[{position}] is not an object"
        )));
    }
    Ok(Suggestion {
        category: required_str(value, "category")?.to_string(),
        description: required_str(value, "description")?.to_string(),
        current: optional_str(value, "current").unwrap_or_default().to_string(),
        suggested: optional_str(value, "suggested").unwrap_or_default().to_string(),
    })
}

fn parse_ai_redline(
    value: &Value,
    position: usize,
    model: &str,
    now: DateTime<Utc>,
) -> Result<Redline, PipelineError> {
    if !value.is_object() {
        return Err(malformed(&format!("redlines[{position}] is not an object")));
    }
    let paragraph_value = value
        .get("paragraph_number")
        .or_else(|| value.get("paragraph"))
        .ok_or_else(|| malformed(&format!("redlines[{position}] has no paragraph index")))?;
    let paragraph = coerce_integer(paragraph_value, "redlines.paragraph")?;
    if paragraph < 0 {
        return Err(malformed(&format!(
            "redlines[{position}] paragraph index is negative"
        )));
    }
    let kind_raw = required_str(value, "change_type")?;
    let change_type = canonical_change_kind(kind_raw)
        .ok_or_else(|| malformed(&format!("unknown change type '{kind_raw}'")))?;

    Ok(Redline {
        paragraph_number: paragraph as usize,
        original_text: optional_str(value, "original_text").unwrap_or_default().to_string(),
        modified_text: optional_str(value, "modified_text").unwrap_or_default().to_string(),
        author: optional_str(value, "author").unwrap_or(model).to_string(),
        date: optional_str(value, "date")
            .map(str::to_string)
            .unwrap_or_else(|| now.to_rfc3339()),
        change_type,
        origin: RedlineOrigin::Analysis,
    })
}

fn parse_array<'a>(
    root: &'a Value,
    field: &str,
) -> Result<&'a [Value], PipelineError> {
    match root.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(malformed(&format!("field '{field}' is not an array"))),
    }
}

/// Parse and validate the provider's textual reply.
///
/// `model` and `now` fill in defaults for AI-suggested redlines lacking an
/// author or date.
pub fn parse_analysis(
    reply: &str,
    model: &str,
    now: DateTime<Utc>,
) -> Result<ValidatedAnalysis, PipelineError> {
    let json = extract_json(reply).ok_or_else(|| malformed("no JSON object in reply"))?;
    let root: Value =
        serde_json::from_str(json).map_err(|e| malformed(&format!("invalid JSON: {e}")))?;
    if !root.is_object() {
        return Err(malformed("reply JSON is not an object"));
    }

    let issues = parse_array(&root, "issues")?
        .iter()
        .enumerate()
        .map(|(i, value)| parse_issue(value, i))
        .collect::<Result<Vec<_>, _>>()?;

    let suggestions = parse_array(&root, "suggestions")?
        .iter()
        .enumerate()
        .map(|(i, value)| parse_suggestion(value, i))
        .collect::<Result<Vec<_>, _>>()?;

    let raw_score = coerce_integer(
        root.get("risk_score")
            .ok_or_else(|| malformed("missing field 'risk_score'"))?,
        "risk_score",
    )?;
    let risk_score = raw_score.clamp(0, 100) as u8;
    if raw_score != i64::from(risk_score) {
        tracing::warn!(raw_score, clamped = risk_score, "risk score out of range, clamped");
    }

    let redlines = parse_array(&root, "redlines")?
        .iter()
        .enumerate()
        .map(|(i, value)| parse_ai_redline(value, i, model, now))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ValidatedAnalysis {
        issues,
        suggestions,
        risk_score,
        redlines,
    })
}

/// Merge document-native and AI-suggested redlines into one sequence
/// sorted ascending by paragraph index. At equal indexes document-native
/// entries come first.
pub fn merge_redlines(
    document_native: Vec<Redline>,
    ai_suggested: Vec<Redline>,
) -> Vec<Redline> {
    let mut merged = document_native;
    merged.extend(ai_suggested);
    merged.sort_by_key(|r| (r.paragraph_number, r.origin));
    merged
}
