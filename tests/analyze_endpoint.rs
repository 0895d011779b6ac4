//! End-to-end tests for the analyze endpoint, driven through the router
//! with stub providers in place of the real AI services.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;

use clausecheck::analysis::CompletionProvider;
use clausecheck::config::Settings;
use clausecheck::error::PipelineError;
use clausecheck::limits::{
    AdmissionPolicy, RateLimitPolicy, SemaphoreAdmission, SlidingWindowRateLimiter,
};
use clausecheck::pipeline::Pipeline;
use clausecheck::report::{LegalContext, LegalReference, ReferenceType};
use clausecheck::research::{ContextEnricher, ResearchInput};
use clausecheck::server::{AppState, build_router};

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const BOUNDARY: &str = "clausecheck-test-boundary";

fn docx_with_body(body: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}</w:body></w:document>"
    );
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("word/document.xml", SimpleFileOptions::default())
        .expect("start zip entry");
    writer.write_all(xml.as_bytes()).expect("write zip entry");
    writer.finish().expect("finish zip").into_inner()
}

fn contract_body() -> String {
    "<w:p><w:r><w:t>This agreement binds the parties, who hereby agree to these terms, \
     obligations, payment, termination, governing law and signature conditions.</w:t></w:r>\
     <w:del w:author=\"Alice\" w:date=\"2026-01-02T08:00:00Z\">\
     <w:r><w:delText>void clause</w:delText></w:r></w:del></w:p>\
     <w:p><w:r><w:t>The contractor accepts unlimited liability.</w:t></w:r></w:p>"
        .to_string()
}

struct StubCompletion {
    reply: String,
    calls: AtomicUsize,
}

impl StubCompletion {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CompletionProvider for StubCompletion {
    fn model(&self) -> &str {
        "stub-model"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct StubEnricher;

#[async_trait]
impl ContextEnricher for StubEnricher {
    async fn enrich(&self, _input: &ResearchInput<'_>) -> Option<LegalContext> {
        Some(LegalContext {
            topic: "service agreements".to_string(),
            jurisdiction: "Ireland".to_string(),
            summary: "Standard consulting arrangement.".to_string(),
            laws: vec![LegalReference {
                title: "Sale of Goods and Supply of Services Act 1980".to_string(),
                description: "Implied terms for services.".to_string(),
                relevance: "Governs implied quality terms in service contracts.".to_string(),
                source: String::new(),
                reference_type: ReferenceType::Law,
            }],
            cases: Vec::new(),
        })
    }
}

struct App {
    router: Router,
}

fn app(completion: Arc<StubCompletion>, enricher: Option<Arc<dyn ContextEnricher>>) -> App {
    app_with_limits(completion, enricher, 100, 2)
}

fn app_with_limits(
    completion: Arc<StubCompletion>,
    enricher: Option<Arc<dyn ContextEnricher>>,
    rate_limit: u32,
    max_concurrent: usize,
) -> App {
    app_with_settings(
        Settings::for_tests(),
        completion,
        enricher,
        rate_limit,
        max_concurrent,
    )
}

fn app_with_settings(
    settings: Settings,
    completion: Arc<StubCompletion>,
    enricher: Option<Arc<dyn ContextEnricher>>,
    rate_limit: u32,
    max_concurrent: usize,
) -> App {
    let settings = Arc::new(settings);
    let pipeline = Pipeline::new(Arc::clone(&settings), completion, enricher);
    let rate_limiter: Arc<dyn RateLimitPolicy> =
        Arc::new(SlidingWindowRateLimiter::per_minute(rate_limit));
    let admission: Arc<dyn AdmissionPolicy> = Arc::new(SemaphoreAdmission::new(max_concurrent));
    let state = Arc::new(AppState::new(settings, pipeline, rate_limiter, admission));
    App {
        router: build_router(state),
    }
}

struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    fn new() -> Self {
        Self { body: Vec::new() }
    }

    fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                 filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}

fn analyze_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/analyze-contract")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

fn analyze_request_via_proxy(body: Vec<u8>, forwarded_for: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/analyze-contract")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(body))
        .expect("request")
}

fn standard_form(docx: &[u8]) -> Vec<u8> {
    MultipartForm::new()
        .file("file", "contract.docx", DOCX_MIME, docx)
        .text("description", "Consulting services agreement")
        .text("contract_type", "service")
        .finish()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

const GOOD_REPLY: &str = r#"{
    "issues": [{
        "type": "liability",
        "severity": "high",
        "description": "Unlimited liability",
        "location": {"paragraph": 2, "text": "unlimited liability"},
        "suggestion": "Cap liability at fees paid"
    }],
    "suggestions": [{
        "category": "liability",
        "description": "Add a liability cap",
        "current": "unlimited liability",
        "suggested": "liability capped at fees paid"
    }],
    "risk_score": 150,
    "redlines": [{
        "paragraph": 2,
        "original_text": "unlimited liability",
        "modified_text": "liability capped at fees paid",
        "change_type": "modification"
    }]
}"#;

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let app = app(StubCompletion::new(GOOD_REPLY), None);
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn analyze_returns_a_full_report() {
    let completion = StubCompletion::new(GOOD_REPLY);
    let app = app(completion.clone(), Some(Arc::new(StubEnricher)));

    let response = app
        .router
        .oneshot(analyze_request(standard_form(&docx_with_body(
            &contract_body(),
        ))))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "success");

    let analysis = &body["analysis"];
    assert_eq!(analysis["risk_score"], 100, "out-of-range score is clamped");
    assert_eq!(analysis["issues"][0]["severity"], "high");
    assert_eq!(analysis["suggestions"][0]["category"], "liability");

    // Document redline (P1) sorts before the AI redline (P2).
    let redlines = analysis["redlines"].as_array().expect("redlines array");
    assert_eq!(redlines.len(), 2);
    assert_eq!(redlines[0]["paragraph_number"], 1);
    assert_eq!(redlines[0]["author"], "Alice");
    assert_eq!(redlines[0]["change_type"], "deletion");
    assert_eq!(redlines[1]["paragraph_number"], 2);
    assert_eq!(redlines[1]["author"], "stub-model");

    assert_eq!(analysis["legal_context"]["jurisdiction"], "Ireland");
    assert_eq!(
        analysis["legal_context"]["laws"][0]["reference_type"],
        "law"
    );
    assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn research_is_omitted_when_no_enricher_is_configured() {
    let app = app(StubCompletion::new(GOOD_REPLY), None);
    let response = app
        .router
        .oneshot(analyze_request(standard_form(&docx_with_body(
            &contract_body(),
        ))))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["analysis"].get("legal_context").is_none());
}

#[tokio::test]
async fn missing_file_field_is_a_bad_request() {
    let app = app(StubCompletion::new(GOOD_REPLY), None);
    let form = MultipartForm::new()
        .text("description", "Consulting services agreement")
        .finish();

    let response = app
        .router
        .oneshot(analyze_request(form))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn missing_description_is_a_bad_request() {
    let app = app(StubCompletion::new(GOOD_REPLY), None);
    let form = MultipartForm::new()
        .file(
            "file",
            "contract.docx",
            DOCX_MIME,
            &docx_with_body(&contract_body()),
        )
        .finish();

    let response = app
        .router
        .oneshot(analyze_request(form))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn non_docx_upload_is_rejected_without_calling_the_provider() {
    let completion = StubCompletion::new(GOOD_REPLY);
    let app = app(completion.clone(), None);
    let form = MultipartForm::new()
        .file("file", "contract.pdf", "application/pdf", b"%PDF-1.7")
        .text("description", "Consulting services agreement")
        .finish();

    let response = app
        .router
        .oneshot(analyze_request(form))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "UNSUPPORTED_FORMAT");
    assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oversize_document_reports_size_and_limit() {
    let completion = StubCompletion::new(GOOD_REPLY);
    let app = app(completion.clone(), None);
    let limit = Settings::for_tests().max_upload_bytes;
    let oversize = vec![b'a'; limit + 1];
    let form = MultipartForm::new()
        .file("file", "contract.docx", DOCX_MIME, &oversize)
        .text("description", "Consulting services agreement")
        .finish();

    let response = app
        .router
        .oneshot(analyze_request(form))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(body["error"]["details"]["limit_bytes"], limit);
    assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upload_far_beyond_the_limit_is_still_payload_too_large() {
    // Large enough to blow past the transport body limit as well, not
    // just the document size check.
    let completion = StubCompletion::new(GOOD_REPLY);
    let app = app(completion.clone(), None);
    let limit = Settings::for_tests().max_upload_bytes;
    let oversize = vec![b'a'; limit + 256 * 1024];
    let form = MultipartForm::new()
        .file("file", "contract.docx", DOCX_MIME, &oversize)
        .text("description", "Consulting services agreement")
        .finish();

    let response = app
        .router
        .oneshot(analyze_request(form))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(body["error"]["details"]["limit_bytes"], limit);
    assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stalled_upload_is_cut_off_at_the_request_deadline() {
    use futures::StreamExt;

    let mut settings = Settings::for_tests();
    settings.request_timeout = std::time::Duration::from_millis(100);
    let app = app_with_settings(settings, StubCompletion::new(GOOD_REPLY), None, 100, 1);

    // Opening of a file part, then the stream stalls forever.
    let prefix = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
         filename=\"contract.docx\"\r\nContent-Type: {DOCX_MIME}\r\n\r\n"
    );
    let stalled = futures::stream::iter(vec![Ok::<_, std::io::Error>(bytes::Bytes::from(
        prefix,
    ))])
    .chain(futures::stream::pending());
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/analyze-contract")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(stalled))
        .expect("request");

    let response = app.router.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "REQUEST_TIMEOUT");
}

#[tokio::test]
async fn corrupt_archive_is_a_corrupt_document_error() {
    let app = app(StubCompletion::new(GOOD_REPLY), None);
    let form = standard_form(b"this is not a zip archive");

    let response = app
        .router
        .oneshot(analyze_request(form))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "CORRUPT_DOCUMENT");
}

#[tokio::test]
async fn unrepairable_ai_reply_maps_to_bad_gateway() {
    let app = app(StubCompletion::new("no JSON here at all"), None);

    let response = app
        .router
        .oneshot(analyze_request(standard_form(&docx_with_body(
            &contract_body(),
        ))))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "MALFORMED_ANALYSIS_RESPONSE");
}

#[tokio::test]
async fn rate_limit_rejects_the_excess_request() {
    let app = app_with_limits(StubCompletion::new(GOOD_REPLY), None, 2, 2);
    let docx = docx_with_body(&contract_body());

    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(analyze_request(standard_form(&docx)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .router
        .oneshot(analyze_request(standard_form(&docx)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn forwarded_for_header_cannot_mint_fresh_rate_limit_keys() {
    // Direct clients share one bucket no matter what they forward.
    let app = app_with_limits(StubCompletion::new(GOOD_REPLY), None, 1, 2);
    let docx = docx_with_body(&contract_body());

    let response = app
        .router
        .clone()
        .oneshot(analyze_request_via_proxy(standard_form(&docx), "10.0.0.1"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(analyze_request_via_proxy(standard_form(&docx), "10.0.0.2"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn forwarded_for_keys_the_rate_limit_behind_a_trusted_proxy() {
    let mut settings = Settings::for_tests();
    settings.trust_forwarded_for = true;
    let app = app_with_settings(settings, StubCompletion::new(GOOD_REPLY), None, 1, 2);
    let docx = docx_with_body(&contract_body());

    for client in ["10.0.0.1", "10.0.0.2"] {
        let response = app
            .router
            .clone()
            .oneshot(analyze_request_via_proxy(standard_form(&docx), client))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn saturated_concurrency_rejects_with_429() {
    // Zero slots: every request is rejected at admission.
    let app = app_with_limits(StubCompletion::new(GOOD_REPLY), None, 100, 0);

    let response = app
        .router
        .oneshot(analyze_request(standard_form(&docx_with_body(
            &contract_body(),
        ))))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "CONCURRENCY_LIMIT_EXCEEDED");
}
