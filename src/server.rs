//! Axum HTTP server for the contract analysis API.
//!
//! Two routes: a health probe and the multipart analyze endpoint. Rate
//! limiting and concurrency admission happen before any upload bytes are
//! parsed.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, DefaultBodyLimit, FromRequestParts, Multipart, State,
        multipart::MultipartError,
    },
    http::{header, request::Parts},
    routing::{get, post},
};
use bytes::BytesMut;
use serde::Serialize;
use tokio::time::timeout;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::PipelineError;
use crate::limits::{AdmissionPolicy, RateLimitPolicy};
use crate::pipeline::{AnalyzeRequest, Pipeline};
use crate::report::AnalysisReport;

/// Multipart framing overhead allowed on top of the document size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state for all handlers.
pub struct AppState {
    pub pipeline: Pipeline,
    pub rate_limiter: Arc<dyn RateLimitPolicy>,
    pub admission: Arc<dyn AdmissionPolicy>,
    pub max_upload_bytes: usize,
    pub request_timeout: std::time::Duration,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        pipeline: Pipeline,
        rate_limiter: Arc<dyn RateLimitPolicy>,
        admission: Arc<dyn AdmissionPolicy>,
    ) -> Self {
        Self {
            pipeline,
            rate_limiter,
            admission,
            max_upload_bytes: settings.max_upload_bytes,
            request_timeout: settings.request_timeout,
            trust_forwarded_for: settings.trust_forwarded_for,
        }
    }
}

/// Rate-limit key for the calling client: the first `X-Forwarded-For` hop
/// when the deployment trusts its proxy, then the peer address, then a
/// shared anonymous bucket. The header is attacker-controlled on a direct
/// connection, so it only counts behind the config flag.
struct ClientKey(String);

impl FromRequestParts<Arc<AppState>> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Infallible> {
        if state.trust_forwarded_for
            && let Some(forwarded) = parts.headers.get("x-forwarded-for")
            && let Ok(value) = forwarded.to_str()
            && let Some(first_hop) = value.split(',').next()
            && !first_hop.trim().is_empty()
        {
            return Ok(Self(first_hop.trim().to_string()));
        }
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(Self(addr.ip().to_string()));
        }
        Ok(Self("anonymous".to_string()))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct AnalyzeResponse {
    status: &'static str,
    analysis: AnalysisReport,
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/analyze-contract", post(analyze_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "clausecheck",
    })
}

async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    ClientKey(client_key): ClientKey,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, PipelineError> {
    if !state.rate_limiter.check(&client_key) {
        tracing::warn!(client = %client_key, "rate limit exceeded");
        return Err(PipelineError::RateLimitExceeded);
    }
    let Some(_admission) = state.admission.try_acquire() else {
        tracing::warn!(client = %client_key, "concurrency limit reached");
        return Err(PipelineError::ConcurrencyLimitExceeded);
    };

    // The deadline covers reading the body too, so a slow upload cannot
    // hold its admission slot past the request timeout.
    let outcome = timeout(state.request_timeout, async {
        let request = read_analyze_request(multipart, state.max_upload_bytes).await?;
        state.pipeline.analyze(request).await
    })
    .await;
    let report = match outcome {
        Ok(result) => result?,
        Err(_) => return Err(PipelineError::RequestTimeout),
    };

    Ok(Json(AnalyzeResponse {
        status: "success",
        analysis: report,
    }))
}

/// Collect the multipart form into an [`AnalyzeRequest`]. The `file` and
/// `description` fields are required; `contract_type` and `jurisdiction`
/// are optional.
async fn read_analyze_request(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<AnalyzeRequest, PipelineError> {
    let mut file: Option<(String, Option<String>, bytes::Bytes)> = None;
    let mut description: Option<String> = None;
    let mut contract_type: Option<String> = None;
    let mut jurisdiction: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| map_multipart_error(e, "malformed multipart body", max_bytes))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.docx").to_string();
                let content_type = field.content_type().map(str::to_string);
                let mut data = BytesMut::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| map_multipart_error(e, "failed to read file field", max_bytes))?
                {
                    // Bail before the transport body limit trips so an
                    // oversize document reports as too large, not malformed.
                    if data.len() + chunk.len() > max_bytes {
                        return Err(PipelineError::PayloadTooLarge {
                            size: data.len() + chunk.len(),
                            limit: max_bytes,
                        });
                    }
                    data.extend_from_slice(&chunk);
                }
                file = Some((file_name, content_type, data.freeze()));
            }
            "description" => {
                description = Some(read_text_field(field, "description", max_bytes).await?);
            }
            "contract_type" => {
                contract_type =
                    non_empty(read_text_field(field, "contract_type", max_bytes).await?);
            }
            "jurisdiction" => {
                jurisdiction = non_empty(read_text_field(field, "jurisdiction", max_bytes).await?);
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    let (file_name, content_type, bytes) = file
        .ok_or_else(|| PipelineError::InvalidRequest("missing 'file' field".to_string()))?;
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| {
            PipelineError::InvalidRequest("missing or empty 'description' field".to_string())
        })?;

    Ok(AnalyzeRequest {
        file_name,
        content_type,
        bytes,
        description,
        contract_type,
        jurisdiction,
    })
}

async fn read_text_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
    max_bytes: usize,
) -> Result<String, PipelineError> {
    field.text().await.map_err(|e| {
        map_multipart_error(e, &format!("failed to read '{name}' field"), max_bytes)
    })
}

/// A multipart error whose source chain ends in the transport body limit
/// means the upload was too large; everything else is a malformed request.
/// The stream is cut at the limit, so the reported size is the bound that
/// was exceeded rather than the full upload size.
fn map_multipart_error(err: MultipartError, context: &str, max_bytes: usize) -> PipelineError {
    if length_limit_reached(&err) {
        return PipelineError::PayloadTooLarge {
            size: max_bytes + MULTIPART_OVERHEAD,
            limit: max_bytes,
        };
    }
    PipelineError::InvalidRequest(format!("{context}: {err}"))
}

fn length_limit_reached(err: &(dyn std::error::Error + 'static)) -> bool {
    if err
        .downcast_ref::<http_body_util::LengthLimitError>()
        .is_some()
    {
        return true;
    }
    err.source().is_some_and(length_limit_reached)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Bind and serve until the shutdown future resolves.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    tracing::info!(%bound, "listening");

    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    #[test]
    fn body_limit_leaves_room_for_multipart_framing() {
        assert!(MULTIPART_OVERHEAD >= 16 * 1024);
    }

    #[test]
    fn health_response_shape() {
        let body = serde_json::to_value(HealthResponse {
            status: "healthy",
            service: "clausecheck",
        })
        .expect("serializes");
        assert_eq!(body["status"], "healthy");
    }

    #[test]
    fn rate_limit_error_maps_to_429() {
        assert_eq!(
            PipelineError::RateLimitExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
