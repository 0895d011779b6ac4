//! Best-effort extraction of key contract sections.
//!
//! Five fixed categories are located by keyword matching over the parsed
//! paragraphs. A missing section is valid output, not an error; the
//! analysis prompt simply marks it as not found.

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use regex::RegexSet;

use crate::document::Paragraph;

/// The fixed contract section categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Liability,
    PaymentTerms,
    NoticePeriods,
    Termination,
    GoverningLaw,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Liability,
        Section::PaymentTerms,
        Section::NoticePeriods,
        Section::Termination,
        Section::GoverningLaw,
    ];

    /// Name used in the prompt and in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Liability => "liability_clauses",
            Self::PaymentTerms => "payment_terms",
            Self::NoticePeriods => "notice_periods",
            Self::Termination => "termination_clauses",
            Self::GoverningLaw => "governing_law",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Liability => &["liability", "liable", "indemnif"],
            Self::PaymentTerms => &["payment", "fee", "compensation", "invoice"],
            Self::NoticePeriods => &["notice", "notif"],
            Self::Termination => &["terminat"],
            Self::GoverningLaw => &["govern", "jurisdiction", "applicable law"],
        }
    }
}

/// Best-matching paragraph text per category; `None` when nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedSections {
    pub liability: Option<String>,
    pub payment_terms: Option<String>,
    pub notice_periods: Option<String>,
    pub termination: Option<String>,
    pub governing_law: Option<String>,
}

impl ExtractedSections {
    pub fn get(&self, section: Section) -> Option<&str> {
        match section {
            Section::Liability => self.liability.as_deref(),
            Section::PaymentTerms => self.payment_terms.as_deref(),
            Section::NoticePeriods => self.notice_periods.as_deref(),
            Section::Termination => self.termination.as_deref(),
            Section::GoverningLaw => self.governing_law.as_deref(),
        }
    }

    fn set(&mut self, section: Section, text: String) {
        let slot = match section {
            Section::Liability => &mut self.liability,
            Section::PaymentTerms => &mut self.payment_terms,
            Section::NoticePeriods => &mut self.notice_periods,
            Section::Termination => &mut self.termination,
            Section::GoverningLaw => &mut self.governing_law,
        };
        *slot = Some(text);
    }
}

static SECTION_MATCHERS: LazyLock<Vec<(Section, AhoCorasick)>> = LazyLock::new(|| {
    Section::ALL
        .iter()
        .map(|&section| {
            let matcher = AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(section.keywords())
                .expect("section keyword automaton");
            (section, matcher)
        })
        .collect()
});

/// Scan the paragraphs and pick, per category, the paragraph with the most
/// keyword hits. Earlier paragraphs win ties.
pub fn extract_sections(paragraphs: &[Paragraph]) -> ExtractedSections {
    let mut sections = ExtractedSections::default();

    for (section, matcher) in SECTION_MATCHERS.iter() {
        let mut best: Option<(usize, &Paragraph)> = None;
        for paragraph in paragraphs {
            if paragraph.text.trim().is_empty() {
                continue;
            }
            let hits = matcher.find_iter(&paragraph.text).count();
            if hits > 0 && best.map_or(true, |(best_hits, _)| hits > best_hits) {
                best = Some((hits, paragraph));
            }
        }
        if let Some((_, paragraph)) = best {
            sections.set(*section, paragraph.text.clone());
        }
    }

    sections
}

// Contract-likeness heuristic, carried over from the upstream service's
// fallback validation. Advisory only: a miss logs a warning and surfaces
// an informational issue, never a rejection.

static CONTRACT_INDICATORS: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "agreement",
            "contract",
            "terms and conditions",
            "parties",
            "hereby agree",
            "obligations",
            "effective date",
            "in witness whereof",
            "signature",
            "signed by",
        ])
        .expect("contract indicator automaton")
});

static ESSENTIAL_SECTION_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)parties?",
        r"(?i)purpose|scope",
        r"(?i)terms?",
        r"(?i)conditions?",
        r"(?i)obligations?",
        r"(?i)payment|compensation",
        r"(?i)termination",
        r"(?i)governing law|jurisdiction",
        r"(?i)signature|execution",
    ])
    .expect("essential section patterns")
});

/// True when the text reads like a legal contract: at least three contract
/// indicators and four essential-section patterns present.
pub fn looks_like_contract(text: &str) -> bool {
    let mut seen = [false; 10];
    for hit in CONTRACT_INDICATORS.find_iter(text) {
        seen[hit.pattern().as_usize()] = true;
    }
    let indicator_count = seen.iter().filter(|&&s| s).count();
    let section_count = ESSENTIAL_SECTION_PATTERNS.matches(text).iter().count();
    indicator_count >= 3 && section_count >= 4
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn paragraphs(texts: &[&str]) -> Vec<Paragraph> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Paragraph {
                index: i + 1,
                text: text.to_string(),
            })
            .collect()
    }

    #[test]
    fn finds_each_category_in_a_simple_contract() {
        let paragraphs = paragraphs(&[
            "Liability Clause",
            "The contractor shall be liable for all damages and shall indemnify the client.",
            "Payment shall be made within 30 days of invoice.",
            "A notice period of 30 days is required before termination.",
            "This agreement is governed by the laws of Ireland.",
        ]);

        let sections = extract_sections(&paragraphs);
        assert_eq!(
            sections.liability.as_deref(),
            Some("The contractor shall be liable for all damages and shall indemnify the client.")
        );
        assert_eq!(
            sections.payment_terms.as_deref(),
            Some("Payment shall be made within 30 days of invoice.")
        );
        assert!(sections.notice_periods.is_some());
        assert!(sections.termination.is_some());
        assert_eq!(
            sections.governing_law.as_deref(),
            Some("This agreement is governed by the laws of Ireland.")
        );
    }

    #[test]
    fn prefers_the_paragraph_with_more_keyword_hits() {
        let paragraphs = paragraphs(&[
            "Payment is discussed later.",
            "Payment of the fee follows the invoice schedule.",
        ]);
        let sections = extract_sections(&paragraphs);
        assert_eq!(
            sections.payment_terms.as_deref(),
            Some("Payment of the fee follows the invoice schedule.")
        );
    }

    #[test]
    fn earlier_paragraph_wins_ties() {
        let paragraphs = paragraphs(&["Termination notice.", "Termination date."]);
        let sections = extract_sections(&paragraphs);
        assert_eq!(sections.termination.as_deref(), Some("Termination notice."));
    }

    #[test]
    fn absent_sections_are_none_not_errors() {
        let sections = extract_sections(&paragraphs(&["Nothing relevant here."]));
        for section in Section::ALL {
            assert_eq!(sections.get(section), None, "{}", section.label());
        }
    }

    #[test]
    fn empty_input_yields_empty_sections() {
        assert_eq!(extract_sections(&[]), ExtractedSections::default());
    }

    #[test]
    fn contract_likeness_accepts_a_real_contract() {
        let text = "This agreement is made between the parties, who hereby agree to the \
                    obligations below. Payment terms: net 30. Termination requires notice. \
                    Governing law: Ireland. Signature of both parties required. \
                    Effective date: 1 January 2026.";
        assert!(looks_like_contract(text));
    }

    #[test]
    fn contract_likeness_rejects_unrelated_text() {
        assert!(!looks_like_contract("Minutes of the weekly standup meeting."));
    }
}
