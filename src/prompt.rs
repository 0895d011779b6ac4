//! Analysis prompt assembly.
//!
//! A single deterministic pure function: identical inputs always produce
//! the identical instruction string, so prompt construction is trivially
//! testable and never a source of nondeterminism.

use std::fmt::Write;

use crate::report::LegalContext;
use crate::sections::{ExtractedSections, Section};

/// Everything the prompt embeds, passed explicitly.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    /// Numbered contract text (`[P#]` blocks).
    pub contract_text: &'a str,
    pub sections: &'a ExtractedSections,
    pub legal_context: Option<&'a LegalContext>,
    pub description: &'a str,
    pub contract_type: Option<&'a str>,
    pub jurisdiction: Option<&'a str>,
}

/// Build the full analysis instruction, including the exact JSON shape the
/// model must return.
pub fn build_analysis_prompt(input: &PromptInput<'_>) -> String {
    let mut context = format!("Contract Description: {}", input.description);
    if let Some(contract_type) = input.contract_type {
        let _ = write!(context, "\nContract Type: {contract_type}");
    }
    if let Some(jurisdiction) = input.jurisdiction {
        let _ = write!(context, "\nJurisdiction: {jurisdiction}");
    }

    let jurisdiction_note = if input.jurisdiction.is_some() {
        " (especially considering the specified jurisdiction)"
    } else {
        ""
    };
    let improvement_note = if input.jurisdiction.is_some() {
        " considering the jurisdiction's legal requirements"
    } else {
        ""
    };

    let mut sections_block = String::new();
    for section in Section::ALL {
        let content = input.sections.get(section).unwrap_or("(not found)");
        let _ = writeln!(sections_block, "- {}: {}", section.label(), content);
    }

    let mut legal_block = String::new();
    if let Some(ctx) = input.legal_context {
        let _ = writeln!(
            legal_block,
            "\nLegal context (topic: {}, jurisdiction: {}):\n{}",
            ctx.topic, ctx.jurisdiction, ctx.summary
        );
        for law in &ctx.laws {
            let _ = writeln!(legal_block, "- Law: {} — {}", law.title, law.relevance);
        }
        for case in &ctx.cases {
            let _ = writeln!(legal_block, "- Case: {} — {}", case.title, case.relevance);
        }
    }

    format!(
        r#"You are a legal contract analyzer. You will analyze the following contract based on this context:

{context}

Analyze the contract with these instructions:

1. Identify and assess key clauses:
   - Liability provisions
   - Payment terms
   - Notice periods
   - Termination conditions
   - Jurisdiction and governing law{jurisdiction_note}

2. For each identified issue:
   - Specify the type of issue
   - Assess severity (Critical/High/Medium/Low/Info)
   - Provide specific location in the text (using [P1], [P2], etc. references)
   - Explain the potential risk
   - Suggest improvements{improvement_note}

Extracted sections:
{sections_block}{legal_block}
Contract text:
{contract_text}

Provide analysis in JSON format matching this structure:
{{
    "issues": [
        {{
            "type": "string",
            "severity": "critical|high|medium|low|info",
            "description": "string",
            "location": {{
                "paragraph": number,
                "text": "string"
            }},
            "suggestion": "string"
        }}
    ],
    "suggestions": [
        {{
            "category": "string",
            "description": "string",
            "current": "string",
            "suggested": "string"
        }}
    ],
    "risk_score": number (0-100)
}}"#,
        context = context,
        jurisdiction_note = jurisdiction_note,
        improvement_note = improvement_note,
        sections_block = sections_block,
        legal_block = legal_block,
        contract_text = input.contract_text,
    )
}
