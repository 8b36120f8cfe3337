//! Request pipeline: URL → render → extract → artifact → store → (enrich).
//!
//! Every run moves through [`Stage`]s in order. A failing stage ends the run
//! with a [`PipelineError`] naming that stage; enrichment never does.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

use pagecast_artifacts::ArtifactBuilder;
use pagecast_extractor::extract_page;
use pagecast_renderer::Renderer;
use pagecast_shared::{
    Artifact, EnrichmentOutcome, EnrichmentResult, ErrorClass, ExtractedArticle, FetchRequest,
    PagecastError, RequestId, StoredArtifact,
};
use pagecast_storage::ArtifactStore;

use crate::enrichment::Enricher;

// ---------------------------------------------------------------------------
// Stages and errors
// ---------------------------------------------------------------------------

/// Position of a run in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Rendering,
    Extracting,
    BuildingArtifact,
    Storing,
    Enriching,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Rendering => "rendering",
            Self::Extracting => "extracting",
            Self::BuildingArtifact => "building_artifact",
            Self::Storing => "storing",
            Self::Enriching => "enriching",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that ended in `Failed(stage, reason)`.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: PagecastError,
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        self.source.class()
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Observer for stage transitions.
pub trait ProgressReporter: Send + Sync {
    /// Called when a run enters `stage`.
    fn stage(&self, stage: Stage);
    /// Called once when a run fails.
    fn failed(&self, error: &PipelineError);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn failed(&self, _error: &PipelineError) {}
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Plain-text variant result.
#[derive(Debug, Clone, Serialize)]
pub struct TextResponse {
    pub title: String,
    pub text: String,
}

impl From<ExtractedArticle> for TextResponse {
    fn from(article: ExtractedArticle) -> Self {
        Self {
            title: article.title,
            text: article.text,
        }
    }
}

/// Artifact variant result.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResponse {
    pub title: String,
    pub url: String,
}

/// Enrichment variant result. `result` is `null` when enrichment degraded.
#[derive(Debug, Clone, Serialize)]
pub struct LearningPathResponse {
    pub title: String,
    pub url: String,
    pub result: Option<serde_json::Value>,
    #[serde(skip)]
    pub outcome: EnrichmentOutcome,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Part of the request deadline kept back for answering once enrichment is cut off.
const DEADLINE_MARGIN_DIVISOR: u32 = 10;
const MAX_DEADLINE_MARGIN: Duration = Duration::from_secs(1);

/// Where enrichment runs.
#[derive(Clone)]
struct EnrichmentTarget {
    enricher: Enricher,
    vector_store_id: String,
    assistant_id: String,
}

/// Shared service handles, built once and reused by every request.
#[derive(Clone)]
pub struct Pipeline {
    renderer: Arc<dyn Renderer>,
    builder: ArtifactBuilder,
    store: Arc<dyn ArtifactStore>,
    enrichment: Option<EnrichmentTarget>,
    request_deadline: Option<Duration>,
}

/// Stage bookkeeping for one run.
struct Run<'a> {
    stage: Stage,
    progress: &'a dyn ProgressReporter,
    started: Instant,
}

impl<'a> Run<'a> {
    fn start(progress: &'a dyn ProgressReporter) -> Self {
        progress.stage(Stage::Received);
        Self {
            stage: Stage::Received,
            progress,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = self.stage.as_str(), to = stage.as_str(), "stage transition");
        self.stage = stage;
        self.progress.stage(stage);
    }

    /// Attach the current stage to a stage failure.
    fn check<T>(&self, result: pagecast_shared::Result<T>) -> PipelineResult<T> {
        result.map_err(|source| {
            let error = PipelineError {
                stage: self.stage,
                source,
            };
            warn!(stage = self.stage.as_str(), error = %error.source, "pipeline failed");
            self.progress.failed(&error);
            error
        })
    }

    fn done(&mut self) {
        self.enter(Stage::Done);
        info!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "pipeline done"
        );
    }
}

impl Pipeline {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        builder: ArtifactBuilder,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            renderer,
            builder,
            store,
            enrichment: None,
            request_deadline: None,
        }
    }

    /// Bound enrichment so a run finishes within `deadline` of starting.
    ///
    /// Enrichment still running near the deadline is dropped and the run ends
    /// with `result: null`, keeping the stored artifact URL.
    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = Some(deadline);
        self
    }

    /// Enable the enrichment stage for [`generate_learning_path`](Self::generate_learning_path).
    pub fn with_enrichment(
        mut self,
        enricher: Enricher,
        vector_store_id: impl Into<String>,
        assistant_id: impl Into<String>,
    ) -> Self {
        self.enrichment = Some(EnrichmentTarget {
            enricher,
            vector_store_id: vector_store_id.into(),
            assistant_id: assistant_id.into(),
        });
        self
    }

    pub fn has_enrichment(&self) -> bool {
        self.enrichment.is_some()
    }

    /// Render and extract only.
    pub async fn extract_text(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressReporter,
    ) -> PipelineResult<ExtractedArticle> {
        let span = info_span!("extract_text", request_id = %RequestId::new(), url = tracing::field::Empty);
        async {
            let mut run = Run::start(progress);
            let article = self.read_article(&mut run, request).await?;
            run.done();
            Ok::<_, PipelineError>(article)
        }
        .instrument(span)
        .await
    }

    /// Render, extract, build a PDF, and store it.
    ///
    /// The PDF is titled `title`, else the extracted title, else the default.
    pub async fn extract_artifact(
        &self,
        request: &FetchRequest,
        title: Option<&str>,
        progress: &dyn ProgressReporter,
    ) -> PipelineResult<ArtifactResponse> {
        let span = info_span!("extract_artifact", request_id = %RequestId::new(), url = tracing::field::Empty);
        async {
            let mut run = Run::start(progress);
            let article = self.read_article(&mut run, request).await?;
            let requested = title.map(str::trim).filter(|t| !t.is_empty());
            let title = self
                .builder
                .resolve_title(requested.or(Some(article.title.as_str())))
                .to_string();
            let (_, stored) = self.publish(&mut run, &article.text, &title).await?;
            run.done();
            Ok::<_, PipelineError>(ArtifactResponse {
                title,
                url: stored.public_url,
            })
        }
        .instrument(span)
        .await
    }

    /// Full pipeline including enrichment.
    ///
    /// The artifact is titled with the extracted title, and enrichment gets the
    /// request description (or the title) as context. Enrichment problems only
    /// null out `result`.
    pub async fn generate_learning_path(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressReporter,
    ) -> PipelineResult<LearningPathResponse> {
        let span = info_span!("generate_learning_path", request_id = %RequestId::new(), url = tracing::field::Empty);
        async {
            let mut run = Run::start(progress);
            let article = self.read_article(&mut run, request).await?;
            let title = self
                .builder
                .resolve_title(Some(article.title.as_str()))
                .to_string();
            let (artifact, stored) = self.publish(&mut run, &article.text, &title).await?;

            run.enter(Stage::Enriching);
            let context = request
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .unwrap_or(title.as_str());
            let enrichment = match self.enrichment_budget(run.started) {
                Some(budget) => {
                    match tokio::time::timeout(budget, self.enrich(artifact, &stored, context))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(
                                budget_ms = budget.as_millis() as u64,
                                "enrichment cut off by the request deadline"
                            );
                            EnrichmentResult::degraded(EnrichmentOutcome::TimedOut {
                                waiting_for: "request deadline".into(),
                            })
                        }
                    }
                }
                None => self.enrich(artifact, &stored, context).await,
            };

            run.done();
            Ok::<_, PipelineError>(LearningPathResponse {
                title,
                url: stored.public_url,
                result: enrichment.json,
                outcome: enrichment.outcome,
            })
        }
        .instrument(span)
        .await
    }

    /// Time left for enrichment in a run that started at `started`.
    fn enrichment_budget(&self, started: Instant) -> Option<Duration> {
        let deadline = self.request_deadline?;
        let margin = (deadline / DEADLINE_MARGIN_DIVISOR).min(MAX_DEADLINE_MARGIN);
        Some(
            deadline
                .saturating_sub(margin)
                .saturating_sub(started.elapsed()),
        )
    }

    async fn read_article(
        &self,
        run: &mut Run<'_>,
        request: &FetchRequest,
    ) -> PipelineResult<ExtractedArticle> {
        let url: Url = run.check(request.target())?;
        tracing::Span::current().record("url", url.as_str());

        run.enter(Stage::Rendering);
        let page = run.check(self.renderer.render(&url).await)?;

        run.enter(Stage::Extracting);
        let article = run.check(extract_page(&page))?;
        info!(
            title = %article.title,
            words = article.word_count,
            "article extracted"
        );
        Ok(article)
    }

    async fn publish(
        &self,
        run: &mut Run<'_>,
        text: &str,
        title: &str,
    ) -> PipelineResult<(Artifact, StoredArtifact)> {
        run.enter(Stage::BuildingArtifact);
        let artifact = run.check(self.builder.build(text, Some(title)).await)?;

        run.enter(Stage::Storing);
        let stored = run.check(self.store.upload(&artifact).await)?;
        Ok((artifact, stored))
    }

    async fn enrich(
        &self,
        artifact: Artifact,
        stored: &StoredArtifact,
        context: &str,
    ) -> EnrichmentResult {
        let Some(target) = &self.enrichment else {
            warn!("enrichment requested but no assistant is configured");
            return EnrichmentResult::degraded(EnrichmentOutcome::Failed {
                message: "enrichment is not configured".into(),
            });
        };
        // The bytes are already in hand; no need to download them again from the store.
        target
            .enricher
            .enrich_bytes(
                &stored.filename,
                artifact.bytes,
                context,
                &target.vector_store_id,
                &target.assistant_id,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use pagecast_shared::IndexFailurePolicy;
    use pagecast_storage::MemoryStore;

    use super::*;
    use crate::enrichment::EnrichmentSettings;
    use crate::poll::PollPolicy;
    use crate::testing::{
        EMPTY_SHELL_HTML, FakeAssistant, LONG_ARTICLE_HTML, LONG_ARTICLE_TITLE, StaticRenderer,
    };

    #[derive(Default)]
    struct RecordingProgress {
        stages: Mutex<Vec<Stage>>,
        failed: Mutex<Option<Stage>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn stage(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }
        fn failed(&self, error: &PipelineError) {
            *self.failed.lock().unwrap() = Some(error.stage);
        }
    }

    fn pipeline(html: &str, store: Arc<MemoryStore>) -> Pipeline {
        Pipeline::new(
            Arc::new(StaticRenderer::html(html)),
            ArtifactBuilder::default(),
            store,
        )
    }

    fn enricher(fake: Arc<FakeAssistant>) -> Enricher {
        Enricher::new(
            fake,
            reqwest::Client::new(),
            EnrichmentSettings {
                structured_output: false,
                index_failure: IndexFailurePolicy::ContinueDegraded,
                index_poll: PollPolicy::fixed(2, Duration::from_millis(1)),
                run_poll: PollPolicy::fixed(3, Duration::from_millis(1)),
            },
        )
    }

    fn request() -> FetchRequest {
        FetchRequest::new("https://engineering.example.com/rust-lifetimes")
    }

    #[tokio::test]
    async fn extract_text_returns_title_and_text() {
        let progress = RecordingProgress::default();
        let article = pipeline(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default()))
            .extract_text(&request(), &progress)
            .await
            .unwrap();

        assert_eq!(article.title, LONG_ARTICLE_TITLE);
        assert!(article.text.contains("Lifetimes describe how long"));
        assert_eq!(
            *progress.stages.lock().unwrap(),
            vec![Stage::Received, Stage::Rendering, Stage::Extracting, Stage::Done]
        );
    }

    #[tokio::test]
    async fn missing_url_fails_before_rendering() {
        let renderer = Arc::new(StaticRenderer::html(LONG_ARTICLE_HTML));
        let pipeline = Pipeline::new(
            renderer.clone(),
            ArtifactBuilder::default(),
            Arc::new(MemoryStore::default()),
        );
        let progress = RecordingProgress::default();

        let err = pipeline
            .extract_artifact(&FetchRequest::default(), None, &progress)
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Received);
        assert_eq!(err.class(), ErrorClass::Input);
        assert_eq!(renderer.calls(), 0);
        assert_eq!(*progress.failed.lock().unwrap(), Some(Stage::Received));
    }

    #[tokio::test]
    async fn empty_page_fails_in_extraction_without_upload() {
        let store = Arc::new(MemoryStore::default());
        let err = pipeline(EMPTY_SHELL_HTML, store.clone())
            .extract_artifact(&request(), None, &SilentProgress)
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Extracting);
        assert_eq!(err.class(), ErrorClass::Unprocessable);
        assert_eq!(store.upload_count(), 0);
    }

    #[tokio::test]
    async fn render_failure_is_a_server_error() {
        let pipeline = Pipeline::new(
            Arc::new(StaticRenderer::failing("page did not reach network idle within 60s")),
            ArtifactBuilder::default(),
            Arc::new(MemoryStore::default()),
        );
        let err = pipeline
            .extract_text(&request(), &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Rendering);
        assert_eq!(err.class(), ErrorClass::Server);
        assert!(err.source.to_string().contains("network idle"));
    }

    #[tokio::test]
    async fn artifact_title_prefers_requested_then_extracted() {
        let store = Arc::new(MemoryStore::new("https://cdn.example.com/pdfs"));
        let pipeline = pipeline(LONG_ARTICLE_HTML, store.clone());

        let custom = pipeline
            .extract_artifact(&request(), Some("My Notes"), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(custom.title, "My Notes");
        assert!(custom.url.starts_with("https://cdn.example.com/pdfs/extracted-"));
        assert!(custom.url.ends_with(".pdf"));

        let extracted = pipeline
            .extract_artifact(&request(), None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(extracted.title, LONG_ARTICLE_TITLE);

        let blank = pipeline
            .extract_artifact(&request(), Some("  "), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(blank.title, LONG_ARTICLE_TITLE);
        assert_eq!(store.upload_count(), 3);
    }

    #[test]
    fn enrichment_budget_leaves_a_margin() {
        let pipeline = pipeline(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default()));
        assert!(pipeline.enrichment_budget(Instant::now()).is_none());

        let bounded = pipeline.with_request_deadline(Duration::from_secs(300));
        let budget = bounded.enrichment_budget(Instant::now()).unwrap();
        assert!(budget <= Duration::from_secs(299));
        assert!(budget > Duration::from_secs(298));
    }

    #[tokio::test]
    async fn request_deadline_cuts_enrichment_short_and_releases_resources() {
        let fake = Arc::new(FakeAssistant::replying("unused").run_never_finishes());
        let enricher = Enricher::new(
            fake.clone(),
            reqwest::Client::new(),
            EnrichmentSettings {
                structured_output: false,
                index_failure: IndexFailurePolicy::ContinueDegraded,
                index_poll: PollPolicy::fixed(2, Duration::from_millis(1)),
                run_poll: PollPolicy::fixed(100, Duration::from_millis(10)),
            },
        );
        let store = Arc::new(MemoryStore::new("https://cdn.example.com/pdfs"));
        let pipeline = pipeline(LONG_ARTICLE_HTML, store.clone())
            .with_enrichment(enricher, "vs_1", "asst_1")
            .with_request_deadline(Duration::from_millis(200));

        let response = pipeline
            .generate_learning_path(&request(), &SilentProgress)
            .await
            .unwrap();
        assert!(response.result.is_none());
        assert_eq!(
            response.outcome,
            EnrichmentOutcome::TimedOut {
                waiting_for: "request deadline".into()
            }
        );
        assert!(response.url.starts_with("https://cdn.example.com/pdfs/"));
        assert_eq!(store.upload_count(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fake.deleted_threads(), vec!["thread_1".to_string()]);
        assert_eq!(fake.deleted_files(), vec!["file_1".to_string()]);
    }

    #[tokio::test]
    async fn upload_failure_fails_in_storing() {
        let store = Arc::new(MemoryStore::failing("bucket not found"));
        let err = pipeline(LONG_ARTICLE_HTML, store)
            .extract_artifact(&request(), None, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Storing);
        assert!(err.source.to_string().contains("bucket not found"));
    }

    #[tokio::test]
    async fn learning_path_carries_enrichment_json() {
        let fake = Arc::new(FakeAssistant::replying(
            "Plan:\n```json\n{\"steps\":[\"borrowing\",\"lifetimes\"]【4:0†source】}\n```",
        ));
        let store = Arc::new(MemoryStore::new("https://cdn.example.com/pdfs"));
        let pipeline =
            pipeline(LONG_ARTICLE_HTML, store).with_enrichment(enricher(fake.clone()), "vs_1", "asst_1");
        let progress = RecordingProgress::default();

        let response = pipeline
            .generate_learning_path(&request().with_description("beginner"), &progress)
            .await
            .unwrap();

        assert_eq!(response.title, LONG_ARTICLE_TITLE);
        assert_eq!(response.result, Some(json!({ "steps": ["borrowing", "lifetimes"] })));
        assert!(fake.prompts()[0].contains("Context: beginner"));
        assert!(progress.stages.lock().unwrap().contains(&Stage::Enriching));
        assert_eq!(progress.stages.lock().unwrap().last(), Some(&Stage::Done));
    }

    #[tokio::test]
    async fn failed_enrichment_still_succeeds_with_null() {
        let fake = Arc::new(FakeAssistant::replying("unused").failing_upload());
        let pipeline = pipeline(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default()))
            .with_enrichment(enricher(fake), "vs_1", "asst_1");

        let response = pipeline
            .generate_learning_path(&request(), &SilentProgress)
            .await
            .unwrap();
        assert!(response.result.is_none());
        assert!(matches!(response.outcome, EnrichmentOutcome::Failed { .. }));
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["result"], serde_json::Value::Null);
        assert!(body.get("outcome").is_none());
    }

    #[tokio::test]
    async fn unconfigured_enrichment_degrades() {
        let response = pipeline(LONG_ARTICLE_HTML, Arc::new(MemoryStore::default()))
            .generate_learning_path(&request(), &SilentProgress)
            .await
            .unwrap();
        assert!(response.result.is_none());
    }
}
