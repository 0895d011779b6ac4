//! Optional legal-research enrichment.
//!
//! Asks a Perplexity-style research endpoint to classify the contract's
//! topic and jurisdiction, then to surface relevant laws and case law.
//! This is the one external call whose failure is non-fatal: any error or
//! timeout logs a warning and the pipeline continues without legal
//! context.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::Settings;
use crate::report::{LegalContext, LegalReference, ReferenceType};
use crate::validate::extract_json;

const PERPLEXITY_API_BASE: &str = "https://api.perplexity.ai";

/// Inputs the enricher works from.
#[derive(Debug, Clone, Copy)]
pub struct ResearchInput<'a> {
    /// Leading portion of the numbered contract text.
    pub contract_excerpt: &'a str,
    pub description: &'a str,
    pub contract_type: Option<&'a str>,
    pub jurisdiction: Option<&'a str>,
}

/// Seam for the research stage; absent entirely when no credentials are
/// configured.
#[async_trait]
pub trait ContextEnricher: Send + Sync {
    async fn enrich(&self, input: &ResearchInput<'_>) -> Option<LegalContext>;
}

#[derive(Debug, Deserialize)]
struct Classification {
    topic: String,
    jurisdiction: String,
    summary: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawReference {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    relevance: String,
    #[serde(default)]
    source: String,
}

fn parse_classification(reply: &str) -> Option<Classification> {
    serde_json::from_str(extract_json(reply)?).ok()
}

/// Parse `{"<key>": [{title, description, relevance, source}, …]}` out of
/// a possibly prose-wrapped reply.
fn parse_reference_list(
    reply: &str,
    key: &str,
    reference_type: ReferenceType,
) -> Option<Vec<LegalReference>> {
    let root: serde_json::Value = serde_json::from_str(extract_json(reply)?).ok()?;
    let items = root.get(key)?.as_array()?.clone();
    let references = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawReference>(item).ok())
        .filter(|raw| !raw.title.is_empty())
        .map(|raw| LegalReference {
            title: raw.title,
            description: raw.description,
            relevance: raw.relevance,
            source: raw.source,
            reference_type,
        })
        .collect();
    Some(references)
}

/// Perplexity chat-completions client (OpenAI-shaped API).
pub struct PerplexityClient {
    http: reqwest::Client,
    api_key: secrecy::SecretString,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl PerplexityClient {
    /// Build the client when research credentials are configured.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let api_key = settings.perplexity_api_key.clone()?;
        let http = reqwest::Client::builder()
            .timeout(settings.research_timeout)
            .build()
            .ok()?;
        Some(Self {
            http,
            api_key,
            model: settings.research_model.clone(),
            base_url: PERPLEXITY_API_BASE.to_string(),
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("transport error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("research provider returned {status}"));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("unreadable research response: {e}"))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| "research response had no choices".to_string())
    }

    async fn enrich_inner(&self, input: &ResearchInput<'_>) -> Result<LegalContext, String> {
        let jurisdiction_hint = input.jurisdiction.unwrap_or("Not specified");
        let type_hint = input.contract_type.unwrap_or("Not specified");

        let classify_reply = self
            .chat(
                "You are a legal expert. Analyze the contract to identify its main topic, \
                 jurisdiction (if not specified), and provide a brief summary. Respond as JSON: \
                 {\"topic\": string, \"jurisdiction\": string, \"summary\": string}",
                &format!(
                    "Contract description: {}\nContract type: {}\nSpecified jurisdiction: {}\n\
                     Contract text:\n{}",
                    input.description, type_hint, jurisdiction_hint, input.contract_excerpt
                ),
            )
            .await?;
        let classification = parse_classification(&classify_reply)
            .ok_or_else(|| "unparsable classification reply".to_string())?;

        let laws_reply = self
            .chat(
                "You are a legal researcher. Find relevant laws and regulations for this \
                 contract. Focus on the most important and recent laws. Respond as JSON: \
                 {\"laws\": [{\"title\": string, \"description\": string, \"relevance\": string, \
                 \"source\": string}]}",
                &format!(
                    "Find relevant laws for a {} contract in {}. Contract summary: {}",
                    classification.topic, classification.jurisdiction, classification.summary
                ),
            )
            .await?;
        let laws = parse_reference_list(&laws_reply, "laws", ReferenceType::Law)
            .ok_or_else(|| "unparsable laws reply".to_string())?;

        let cases_reply = self
            .chat(
                "You are a legal researcher. Find relevant case law and precedents for this \
                 contract. Focus on landmark cases and recent decisions. Respond as JSON: \
                 {\"cases\": [{\"title\": string, \"description\": string, \"relevance\": string, \
                 \"source\": string}]}",
                &format!(
                    "Find relevant cases for a {} contract in {}. Contract summary: {}",
                    classification.topic, classification.jurisdiction, classification.summary
                ),
            )
            .await?;
        let cases = parse_reference_list(&cases_reply, "cases", ReferenceType::Case)
            .ok_or_else(|| "unparsable cases reply".to_string())?;

        Ok(LegalContext {
            topic: classification.topic,
            jurisdiction: classification.jurisdiction,
            summary: classification.summary,
            laws,
            cases,
        })
    }
}

#[async_trait]
impl ContextEnricher for PerplexityClient {
    async fn enrich(&self, input: &ResearchInput<'_>) -> Option<LegalContext> {
        match self.enrich_inner(input).await {
            Ok(context) => Some(context),
            Err(reason) => {
                tracing::warn!(%reason, "legal research failed, continuing without context");
                None
            }
        }
    }
}
