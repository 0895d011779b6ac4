//! Per-request analysis orchestration.
//!
//! One strictly linear pass: load the document, extract sections, enrich
//! with optional legal research, build the prompt, call the analysis
//! provider, validate the reply, and assemble the report. No state is
//! shared between requests and no work outlives the request.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::analysis::CompletionProvider;
use crate::config::Settings;
use crate::document::{ParsedDocument, load_docx};
use crate::error::PipelineError;
use crate::prompt::{PromptInput, build_analysis_prompt};
use crate::report::{AnalysisReport, Issue, IssueLocation, Severity, assemble_report};
use crate::research::{ContextEnricher, ResearchInput};
use crate::sections::{extract_sections, looks_like_contract};
use crate::validate::{merge_redlines, parse_analysis};

/// Maximum contract excerpt forwarded to the research provider.
const RESEARCH_EXCERPT_CHARS: usize = 6000;

/// One analysis submission.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
    pub description: String,
    pub contract_type: Option<String>,
    pub jurisdiction: Option<String>,
}

/// The linear analysis pipeline. Holds only immutable configuration and
/// the two provider seams.
pub struct Pipeline {
    settings: Arc<Settings>,
    completion: Arc<dyn CompletionProvider>,
    enricher: Option<Arc<dyn ContextEnricher>>,
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

impl Pipeline {
    pub fn new(
        settings: Arc<Settings>,
        completion: Arc<dyn CompletionProvider>,
        enricher: Option<Arc<dyn ContextEnricher>>,
    ) -> Self {
        Self {
            settings,
            completion,
            enricher,
        }
    }

    /// Run the full analysis for one request.
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalysisReport, PipelineError> {
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, file = %request.file_name, "starting contract analysis");

        let document = self.load_document(&request).await?;
        let contract_text = document.numbered_text();
        if contract_text.is_empty() {
            return Err(PipelineError::CorruptDocument(
                "document contains no text".to_string(),
            ));
        }
        tracing::info!(
            %request_id,
            paragraphs = document.paragraphs.len(),
            tracked_changes = document.redlines.len(),
            "document parsed"
        );

        let sections = extract_sections(&document.paragraphs);
        let probable_contract = looks_like_contract(&contract_text);
        if !probable_contract {
            tracing::warn!(%request_id, "upload does not read like a legal contract");
        }

        let legal_context = self.enrich(&request, &contract_text, request_id).await;

        let prompt = build_analysis_prompt(&PromptInput {
            contract_text: &contract_text,
            sections: &sections,
            legal_context: legal_context.as_ref(),
            description: &request.description,
            contract_type: request.contract_type.as_deref(),
            jurisdiction: request.jurisdiction.as_deref(),
        });

        let reply = self.completion.complete(&prompt).await?;
        let now = Utc::now();
        let mut validated = parse_analysis(&reply, self.completion.model(), now)?;
        let ai_redlines = std::mem::take(&mut validated.redlines);
        let redlines = merge_redlines(document.redlines, ai_redlines);

        if !probable_contract {
            validated.issues.insert(
                0,
                Issue {
                    kind: "document_classification".to_string(),
                    severity: Severity::Info,
                    description: "The uploaded document does not read like a legal contract; \
                                  analysis confidence may be reduced."
                        .to_string(),
                    location: IssueLocation {
                        paragraph: 1,
                        text: String::new(),
                    },
                    suggestion: "Verify that the correct document was uploaded.".to_string(),
                },
            );
        }

        tracing::info!(
            %request_id,
            issues = validated.issues.len(),
            risk_score = validated.risk_score,
            redlines = redlines.len(),
            "analysis complete"
        );
        Ok(assemble_report(validated, redlines, legal_context, now))
    }

    /// Parse the upload off the async runtime, bounded by the upload
    /// timeout.
    async fn load_document(
        &self,
        request: &AnalyzeRequest,
    ) -> Result<ParsedDocument, PipelineError> {
        let bytes = request.bytes.clone();
        let content_type = request.content_type.clone();
        let file_name = request.file_name.clone();
        let max_bytes = self.settings.max_upload_bytes;

        let parse = tokio::task::spawn_blocking(move || {
            load_docx(&bytes, content_type.as_deref(), &file_name, max_bytes)
        });
        match timeout(self.settings.upload_timeout, parse).await {
            Err(_) => Err(PipelineError::UploadTimeout),
            Ok(Err(join_error)) => Err(PipelineError::Internal(format!(
                "document parse task failed: {join_error}"
            ))),
            Ok(Ok(result)) => result,
        }
    }

    /// Run the optional research stage. Every failure mode, including the
    /// stage timeout, degrades to `None`.
    async fn enrich(
        &self,
        request: &AnalyzeRequest,
        contract_text: &str,
        request_id: Uuid,
    ) -> Option<crate::report::LegalContext> {
        let enricher = self.enricher.as_ref()?;
        let input = ResearchInput {
            contract_excerpt: truncate_at_char_boundary(contract_text, RESEARCH_EXCERPT_CHARS),
            description: &request.description,
            contract_type: request.contract_type.as_deref(),
            jurisdiction: request.jurisdiction.as_deref(),
        };
        match timeout(self.settings.research_timeout, enricher.enrich(&input)).await {
            Ok(context) => context,
            Err(_) => {
                tracing::warn!(%request_id, "legal research timed out, continuing without context");
                None
            }
        }
    }
}
