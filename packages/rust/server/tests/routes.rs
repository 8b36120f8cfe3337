use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use pagecast_artifacts::ArtifactBuilder;
use pagecast_core::poll::PollPolicy;
use pagecast_core::testing::{
    EMPTY_SHELL_HTML, FakeAssistant, LONG_ARTICLE_HTML, LONG_ARTICLE_TITLE, StaticRenderer,
};
use pagecast_core::{Enricher, EnrichmentSettings, Pipeline};
use pagecast_renderer::testing::{Script, ScriptedLauncher};
use pagecast_renderer::{RenderOptions, RendererPool};
use pagecast_server::{AppState, build_api_router, build_app_router};
use pagecast_shared::IndexFailurePolicy;
use pagecast_storage::MemoryStore;

const TIMEOUT: Duration = Duration::from_secs(5);

fn app_with(pipeline: Pipeline, timeout: Duration) -> Router {
    build_api_router(AppState::new(pipeline, timeout))
}

fn app(html: &str, store: Arc<MemoryStore>) -> Router {
    let pipeline = Pipeline::new(
        Arc::new(StaticRenderer::html(html)),
        ArtifactBuilder::default(),
        store,
    );
    app_with(pipeline, TIMEOUT)
}

fn enricher(fake: Arc<FakeAssistant>) -> Enricher {
    enricher_with_run_poll(fake, PollPolicy::fixed(3, Duration::from_millis(1)))
}

fn enricher_with_run_poll(fake: Arc<FakeAssistant>, run_poll: PollPolicy) -> Enricher {
    Enricher::new(
        fake,
        reqwest::Client::new(),
        EnrichmentSettings {
            structured_output: false,
            index_failure: IndexFailurePolicy::ContinueDegraded,
            index_poll: PollPolicy::fixed(2, Duration::from_millis(1)),
            run_poll,
        },
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request builder should not fail")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builder should not fail")
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("handler should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes();
    let text = std::str::from_utf8(bytes.as_ref()).unwrap_or("<non-utf8>");
    let value: Value = serde_json::from_slice(bytes.as_ref())
        .unwrap_or_else(|err| panic!("invalid json: {err}; body={text}"));
    (status, value)
}

const ARTICLE_URL: &str = "https%3A%2F%2Fengineering.example.com%2Frust-lifetimes";

#[tokio::test]
async fn healthz_returns_ok() {
    let (status, body) = send(
        app(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default())),
        get("/healthz"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn extract_returns_title_and_text() {
    let (status, body) = send(
        app(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default())),
        get(&format!("/extract?url={ARTICLE_URL}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], json!(LONG_ARTICLE_TITLE));
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("Lifetimes describe how long"));
    assert!(!text.contains("Copyright"));
}

#[tokio::test]
async fn missing_url_is_400() {
    for request in [
        get("/extract"),
        get("/extract/pdf?title=x"),
        post_json("/generateLearningPath", json!({ "description": "x" })),
    ] {
        let (status, body) = send(
            app(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default())),
            request,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Missing URL query param" }));
    }
}

#[tokio::test]
async fn invalid_url_is_400_with_detail() {
    let (status, body) = send(
        app(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default())),
        get("/extract?url=not-a-url"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid URL"));
    assert!(body["detail"].as_str().unwrap().contains("not-a-url"));
}

#[tokio::test]
async fn malformed_body_is_400() {
    let request = Request::builder()
        .method("POST")
        .uri("/generateLearningPath")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(
        app(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default())),
        request,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid request body"));
}

#[tokio::test]
async fn empty_page_is_422_without_upload() {
    let store = Arc::new(MemoryStore::default());
    let (status, body) = send(
        app(EMPTY_SHELL_HTML, store.clone()),
        get(&format!("/extract/pdf?url={ARTICLE_URL}")),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!({ "error": "Unable to extract content" }));
    assert_eq!(store.upload_count(), 0);
}

#[tokio::test]
async fn extract_pdf_stores_artifact() {
    let store = Arc::new(MemoryStore::new("https://cdn.example.com/pdfs"));
    let (status, body) = send(
        app(LONG_ARTICLE_HTML, store.clone()),
        get(&format!("/extract/pdf?url={ARTICLE_URL}&title=Reading%20List")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], json!("Reading List"));

    let url = body["url"].as_str().unwrap();
    let filename = url.rsplit('/').next().unwrap();
    assert!(filename.starts_with("extracted-") && filename.ends_with(".pdf"));
    let stored = store.get(filename).expect("artifact stored under its filename");
    assert!(stored.starts_with(b"%PDF-"));
}

#[tokio::test]
async fn extract_pdf_defaults_to_extracted_title() {
    let (status, body) = send(
        app(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default())),
        get(&format!("/extract/pdf?url={ARTICLE_URL}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], json!(LONG_ARTICLE_TITLE));
}

#[tokio::test]
async fn upload_failure_is_500_with_detail() {
    let (status, body) = send(
        app(LONG_ARTICLE_HTML, Arc::new(MemoryStore::failing("bucket not found"))),
        get(&format!("/extract/pdf?url={ARTICLE_URL}")),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!("Internal server error"));
    assert!(body["detail"].as_str().unwrap().contains("bucket not found"));
}

#[tokio::test]
async fn navigation_timeout_is_500_and_session_is_released() {
    let launcher = ScriptedLauncher::new(Script::NavigationTimeout);
    let stats = launcher.stats();
    let pool = RendererPool::new(launcher, RenderOptions::default(), 2);
    let pipeline = Pipeline::new(
        Arc::new(pool.clone()),
        ArtifactBuilder::default(),
        Arc::new(MemoryStore::default()),
    );

    let (status, body) = send(
        app_with(pipeline, TIMEOUT),
        get(&format!("/extract?url={ARTICLE_URL}")),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("network idle"));
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.live_sessions(), 0);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn request_deadline_is_500_and_session_is_released() {
    let launcher = ScriptedLauncher::new(Script::Hang);
    let stats = launcher.stats();
    let pool = RendererPool::new(launcher, RenderOptions::default(), 1);
    let pipeline = Pipeline::new(
        Arc::new(pool.clone()),
        ArtifactBuilder::default(),
        Arc::new(MemoryStore::default()),
    );

    let (status, body) = send(
        app_with(pipeline, Duration::from_millis(50)),
        get(&format!("/extract?url={ARTICLE_URL}")),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!("Internal server error"));
    assert_eq!(pool.in_use(), 0);

    // The abandoned session is closed on a spawned task.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.live_sessions(), 0);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn learning_path_returns_enrichment_result() {
    let fake = Arc::new(FakeAssistant::replying(
        "Here you go ```json\n{\"path\":[\"ownership\"]【3:2†source】}\n```",
    ));
    let pipeline = Pipeline::new(
        Arc::new(StaticRenderer::html(LONG_ARTICLE_HTML)),
        ArtifactBuilder::default(),
        Arc::new(MemoryStore::new("https://cdn.example.com/pdfs")),
    )
    .with_enrichment(enricher(fake.clone()), "vs_1", "asst_1");

    let (status, body) = send(
        app_with(pipeline, TIMEOUT),
        post_json(
            "/generateLearningPath",
            json!({
                "url": "https://engineering.example.com/rust-lifetimes",
                "description": "new to Rust",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], json!(LONG_ARTICLE_TITLE));
    assert!(body["url"].as_str().unwrap().starts_with("https://cdn.example.com/pdfs/"));
    assert_eq!(body["result"], json!({ "path": ["ownership"] }));
    assert_eq!(fake.deleted_threads(), vec!["thread_1".to_string()]);
    assert_eq!(fake.deleted_files(), vec!["file_1".to_string()]);
}

#[tokio::test]
async fn learning_path_degrades_to_null_result() {
    let fake = Arc::new(FakeAssistant::replying("no fenced block here"));
    let pipeline = Pipeline::new(
        Arc::new(StaticRenderer::html(LONG_ARTICLE_HTML)),
        ArtifactBuilder::default(),
        Arc::new(MemoryStore::default()),
    )
    .with_enrichment(enricher(fake), "vs_1", "asst_1");

    let (status, body) = send(
        app_with(pipeline, TIMEOUT),
        post_json(
            "/generateLearningPath",
            json!({ "url": "https://engineering.example.com/rust-lifetimes" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], Value::Null);
    assert!(body["url"].as_str().is_some());
}

#[tokio::test]
async fn slow_enrichment_degrades_before_request_deadline() {
    let fake = Arc::new(FakeAssistant::replying("unused").run_never_finishes());
    let pipeline = Pipeline::new(
        Arc::new(StaticRenderer::html(LONG_ARTICLE_HTML)),
        ArtifactBuilder::default(),
        Arc::new(MemoryStore::new("https://cdn.example.com/pdfs")),
    )
    .with_enrichment(
        enricher_with_run_poll(fake.clone(), PollPolicy::fixed(100, Duration::from_millis(10))),
        "vs_1",
        "asst_1",
    );

    let (status, body) = send(
        app_with(pipeline, Duration::from_millis(300)),
        post_json(
            "/generateLearningPath",
            json!({ "url": "https://engineering.example.com/rust-lifetimes" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], Value::Null);
    assert!(body["url"].as_str().unwrap().starts_with("https://cdn.example.com/pdfs/"));

    // The abandoned thread and file are deleted on a spawned task.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fake.deleted_threads(), vec!["thread_1".to_string()]);
    assert_eq!(fake.deleted_files(), vec!["file_1".to_string()]);
}

#[tokio::test]
async fn app_router_sets_request_id() {
    let pipeline = Pipeline::new(
        Arc::new(StaticRenderer::html(LONG_ARTICLE_HTML)),
        ArtifactBuilder::default(),
        Arc::new(MemoryStore::default()),
    );
    let app = build_app_router(AppState::new(pipeline, TIMEOUT));

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = response
        .headers()
        .get("x-request-id")
        .expect("request id propagated")
        .to_str()
        .unwrap();
    assert_eq!(id.len(), 36);

    let echoed = build_app_router(AppState::new(
        Pipeline::new(
            Arc::new(StaticRenderer::html(LONG_ARTICLE_HTML)),
            ArtifactBuilder::default(),
            Arc::new(MemoryStore::default()),
        ),
        TIMEOUT,
    ))
    .oneshot(
        Request::builder()
            .uri("/healthz")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(echoed.headers()["x-request-id"], "abc-123");
}
