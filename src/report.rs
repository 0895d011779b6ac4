//! Core data model for contract analysis reports.
//!
//! Everything here is plain serde data. The final [`AnalysisReport`] is
//! assembled from validated provider output, the document's own tracked
//! changes, and the optional legal-research context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered issue severity. Declaration order is ascending so the derived
/// `Ord` ranks `Critical` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Where in the contract an issue was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLocation {
    /// 1-based paragraph index, matching the `[P#]` markers in the
    /// numbered contract text.
    pub paragraph: usize,
    /// Excerpt of the offending text.
    pub text: String,
}

/// A single problem the analysis flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    pub location: IssueLocation,
    pub suggestion: String,
}

/// A drafting improvement that is not tied to a specific risk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub category: String,
    pub description: String,
    pub current: String,
    pub suggested: String,
}

/// Kind of tracked textual change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insertion,
    Deletion,
    Modification,
}

/// Whether a redline came from the document itself or the analysis.
///
/// Internal only: it drives the merge tie-break and is not serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RedlineOrigin {
    #[default]
    Document,
    Analysis,
}

/// A tracked change, either extracted from the document at parse time or
/// suggested by the analysis provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redline {
    pub paragraph_number: usize,
    pub original_text: String,
    pub modified_text: String,
    pub author: String,
    pub date: String,
    pub change_type: ChangeKind,
    #[serde(skip)]
    pub origin: RedlineOrigin,
}

/// One law or case returned by the research provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalReference {
    pub title: String,
    pub description: String,
    pub relevance: String,
    pub source: String,
    pub reference_type: ReferenceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Law,
    Case,
}

/// Research output grounding the analysis in the contract's jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalContext {
    pub topic: String,
    pub jurisdiction: String,
    pub summary: String,
    pub laws: Vec<LegalReference>,
    pub cases: Vec<LegalReference>,
}

/// The final response payload for a successful analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub issues: Vec<Issue>,
    pub suggestions: Vec<Suggestion>,
    /// Overall contract risk, always within 0..=100.
    pub risk_score: u8,
    pub analysis_timestamp: DateTime<Utc>,
    /// Document-native and AI-suggested redlines, sorted by paragraph.
    pub redlines: Vec<Redline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_context: Option<LegalContext>,
}

/// Validated provider output before redlines and context are merged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAnalysis {
    pub issues: Vec<Issue>,
    pub suggestions: Vec<Suggestion>,
    pub risk_score: u8,
    /// Redlines the provider volunteered, already tagged AI-origin.
    pub redlines: Vec<Redline>,
}

/// Wrap validated fields, merged redlines, and the optional legal context
/// into the final report. Pure shaping, no failure modes.
pub fn assemble_report(
    analysis: ValidatedAnalysis,
    redlines: Vec<Redline>,
    legal_context: Option<LegalContext>,
    now: DateTime<Utc>,
) -> AnalysisReport {
    AnalysisReport {
        issues: analysis.issues,
        suggestions: analysis.suggestions,
        risk_score: analysis.risk_score,
        analysis_timestamp: now,
        redlines,
        legal_context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_critical_highest() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).expect("serialize"),
            "\"critical\""
        );
        assert_eq!(
            serde_json::from_str::<Severity>("\"info\"").expect("deserialize"),
            Severity::Info
        );
    }

    #[test]
    fn redline_origin_is_not_serialized() {
        let redline = Redline {
            paragraph_number: 3,
            original_text: "thirty days".to_string(),
            modified_text: "sixty days".to_string(),
            author: "Reviewer".to_string(),
            date: "2026-01-05T10:00:00Z".to_string(),
            change_type: ChangeKind::Modification,
            origin: RedlineOrigin::Analysis,
        };
        let json = serde_json::to_value(&redline).expect("serialize");
        assert!(json.get("origin").is_none());
        assert_eq!(json["change_type"], "modification");
    }

    #[test]
    fn report_omits_absent_legal_context() {
        let report = assemble_report(
            ValidatedAnalysis {
                issues: vec![],
                suggestions: vec![],
                risk_score: 10,
                redlines: vec![],
            },
            vec![],
            None,
            Utc::now(),
        );
        let json = serde_json::to_value(&report).expect("serialize");
        assert!(json.get("legal_context").is_none());
        assert_eq!(json["risk_score"], 10);
    }
}
