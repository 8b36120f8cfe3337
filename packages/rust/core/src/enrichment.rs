//! AI enrichment of a stored artifact.
//!
//! The artifact is uploaded as an assistant file, indexed into a vector store,
//! and an assistant run over a one-message thread produces a JSON payload.
//! Enrichment never fails the caller: every problem becomes an
//! [`EnrichmentOutcome`] with `json == None`. The thread and the uploaded file
//! are deleted on every path once they exist, including when the caller drops
//! the enrichment future.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use pagecast_shared::{
    AssistantConfig, EnrichmentJob, EnrichmentOutcome, EnrichmentResult, IndexFailurePolicy,
    JobStatus, PagecastError, Result,
};

use crate::assistant::{AssistantService, IndexStatus, RunStatus};
use crate::poll::{Check, PollPolicy, PollResult};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));

/// Source references such as `【3:2†source】` or `【12†report.pdf】`.
static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【[^】]*†[^】]*】|【\d+(?::\d+)*】").expect("valid regex"));

// ---------------------------------------------------------------------------
// Payload extraction
// ---------------------------------------------------------------------------

fn strip_citations(s: &str) -> String {
    CITATION_RE.replace_all(s, "").into_owned()
}

fn parse(payload: &str) -> EnrichmentResult {
    match serde_json::from_str::<Value>(payload) {
        Ok(json) => EnrichmentResult::parsed(json),
        Err(e) => EnrichmentResult::degraded(EnrichmentOutcome::InvalidJson {
            message: e.to_string(),
        }),
    }
}

/// Pull the JSON payload out of an assistant message.
///
/// The first ```` ```json ```` fence is parsed after citation markers are
/// removed. With `direct` set (JSON-object response mode) the whole message
/// is tried as JSON before looking for a fence.
pub fn extract_json(message: &str, direct: bool) -> EnrichmentResult {
    if direct {
        let whole = strip_citations(message.trim());
        if let Ok(json) = serde_json::from_str::<Value>(whole.trim()) {
            return EnrichmentResult::parsed(json);
        }
    }

    match FENCE_RE.captures(message).and_then(|c| c.get(1)) {
        Some(block) => parse(strip_citations(block.as_str()).trim()),
        None => EnrichmentResult::degraded(EnrichmentOutcome::NoFencedBlock),
    }
}

/// The single user message of the enrichment thread.
pub fn build_prompt(context_text: &str, json_object: bool) -> String {
    let format = if json_object {
        "Respond with one JSON object and nothing else."
    } else {
        "Put the JSON result inside a ```json fenced block."
    };
    format!(
        "Use the attached document as your primary source. Prefer content retrieved from \
         the file over the context below whenever they differ.\n\n\
         Context: {context}\n\n\
         {format} Return the whole response on a single line, with no newline characters.",
        context = context_text.trim(),
    )
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Behavior knobs for one [`Enricher`].
#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    /// Request JSON-object output and parse the message directly.
    pub structured_output: bool,
    pub index_failure: IndexFailurePolicy,
    pub index_poll: PollPolicy,
    pub run_poll: PollPolicy,
}

impl From<&AssistantConfig> for EnrichmentSettings {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            structured_output: config.structured_output,
            index_failure: config.index_failure,
            index_poll: PollPolicy::from(&config.index_poll),
            run_poll: PollPolicy::from(&config.run_poll),
        }
    }
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Runs enrichment jobs against an [`AssistantService`].
#[derive(Clone)]
pub struct Enricher {
    assistant: Arc<dyn AssistantService>,
    http: Client,
    settings: EnrichmentSettings,
}

type Step<T> = std::result::Result<T, EnrichmentOutcome>;

fn failed(e: &PagecastError) -> EnrichmentOutcome {
    EnrichmentOutcome::Failed {
        message: e.to_string(),
    }
}

impl Enricher {
    pub fn new(
        assistant: Arc<dyn AssistantService>,
        http: Client,
        settings: EnrichmentSettings,
    ) -> Self {
        Self {
            assistant,
            http,
            settings,
        }
    }

    pub fn settings(&self) -> &EnrichmentSettings {
        &self.settings
    }

    /// Fetch the artifact at `artifact_url` and enrich it.
    #[instrument(skip_all, fields(%artifact_url, %vector_store_id, %assistant_id))]
    pub async fn enrich(
        &self,
        artifact_url: &str,
        context_text: &str,
        vector_store_id: &str,
        assistant_id: &str,
    ) -> EnrichmentResult {
        let bytes = match self.fetch_artifact(artifact_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "could not fetch artifact, skipping enrichment");
                return EnrichmentResult::degraded(failed(&e));
            }
        };
        let filename = artifact_filename(artifact_url);
        self.enrich_bytes(&filename, bytes, context_text, vector_store_id, assistant_id)
            .await
    }

    /// Enrich artifact bytes already held by the caller.
    #[instrument(skip_all, fields(%filename, %vector_store_id, %assistant_id))]
    pub async fn enrich_bytes(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        context_text: &str,
        vector_store_id: &str,
        assistant_id: &str,
    ) -> EnrichmentResult {
        let mut guard = JobGuard {
            assistant: Arc::clone(&self.assistant),
            job: EnrichmentJob::new(vector_store_id),
        };

        match self.assistant.upload_file(filename, bytes).await {
            Ok(file_id) => {
                guard.job.file_id = Some(file_id);
                guard.job.advance(JobStatus::Uploaded);
            }
            Err(e) => {
                warn!(error = %e, "file upload failed, enrichment aborted");
                guard.job.advance(JobStatus::Failed);
                return EnrichmentResult::degraded(failed(&e));
            }
        }

        let result = match self.run_job(&mut guard.job, context_text, assistant_id).await {
            Ok(result) => result,
            Err(outcome) => {
                guard.job.advance(JobStatus::Failed);
                EnrichmentResult::degraded(outcome)
            }
        };

        release(self.assistant.as_ref(), &mut guard.job).await;
        info!(
            status = guard.job.status.as_str(),
            parsed = result.json.is_some(),
            outcome = ?result.outcome,
            "enrichment finished"
        );
        result
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PagecastError::Enrichment(format!("fetching {url}: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PagecastError::Enrichment(format!("reading {url}: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Steps after upload. `Err` is an outcome that ends the job as failed.
    async fn run_job(
        &self,
        job: &mut EnrichmentJob,
        context_text: &str,
        assistant_id: &str,
    ) -> Step<EnrichmentResult> {
        self.index(job).await?;

        let prompt = build_prompt(context_text, self.settings.structured_output);
        let thread_id = self
            .assistant
            .create_thread(&prompt)
            .await
            .map_err(|e| failed(&e))?;
        job.thread_id = Some(thread_id.clone());

        let run_id = self
            .assistant
            .create_run(&thread_id, assistant_id, self.settings.structured_output)
            .await
            .map_err(|e| failed(&e))?;
        job.run_id = Some(run_id.clone());
        job.advance(JobStatus::Running);

        let status = match self
            .settings
            .run_poll
            .poll("run", || async {
                self.assistant
                    .run_status(&thread_id, &run_id)
                    .await
                    .map(|status| {
                        if status.is_terminal() {
                            Check::Ready(status)
                        } else {
                            Check::Pending(status.as_str().to_string())
                        }
                    })
            })
            .await
        {
            PollResult::Ready(status) => status,
            PollResult::TimedOut {
                last_status,
                attempts,
            } => {
                warn!(last_status = %last_status, attempts, "run did not finish in time");
                return Err(EnrichmentOutcome::TimedOut {
                    waiting_for: "run".into(),
                });
            }
            PollResult::Failed(e) => return Err(failed(&e)),
        };

        if status != RunStatus::Completed {
            warn!(status = status.as_str(), "run ended without completing");
            return Err(EnrichmentOutcome::RunFailed {
                status: status.as_str().into(),
            });
        }
        let message = self
            .assistant
            .latest_message(&thread_id)
            .await
            .map_err(|e| failed(&e))?;
        job.advance(JobStatus::Completed);
        Ok(match message {
            Some(text) => {
                debug!(message_len = text.len(), "read run output");
                extract_json(&text, self.settings.structured_output)
            }
            None => EnrichmentResult::degraded(EnrichmentOutcome::NoMessage),
        })
    }

    /// Attach the file and wait for indexing, applying the index failure policy.
    async fn index(&self, job: &mut EnrichmentJob) -> Step<()> {
        let file_id = job.file_id.clone().unwrap_or_default();
        let vector_store_id = job.vector_store_id.clone();
        job.advance(JobStatus::Indexing);

        let attached = match self.assistant.attach_file(&vector_store_id, &file_id).await {
            Ok(status) => status,
            Err(e) => return self.index_failed(job, failed(&e)),
        };

        let status = if attached == IndexStatus::Completed {
            attached
        } else {
            match self
                .settings
                .index_poll
                .poll("index", || async {
                    self.assistant
                        .index_status(&vector_store_id, &file_id)
                        .await
                        .map(|status| match status {
                            IndexStatus::InProgress | IndexStatus::Unknown => {
                                Check::Pending(status.as_str().to_string())
                            }
                            terminal => Check::Ready(terminal),
                        })
                })
                .await
            {
                PollResult::Ready(status) => status,
                PollResult::TimedOut { .. } => {
                    return self.index_failed(
                        job,
                        EnrichmentOutcome::TimedOut {
                            waiting_for: "index".into(),
                        },
                    );
                }
                PollResult::Failed(e) => return self.index_failed(job, failed(&e)),
            }
        };

        if status == IndexStatus::Completed {
            job.advance(JobStatus::Indexed);
            debug!("file indexed");
            Ok(())
        } else {
            self.index_failed(
                job,
                EnrichmentOutcome::Failed {
                    message: format!("indexing ended as {}", status.as_str()),
                },
            )
        }
    }

    fn index_failed(&self, job: &mut EnrichmentJob, outcome: EnrichmentOutcome) -> Step<()> {
        job.advance(JobStatus::IndexFailed);
        match self.settings.index_failure {
            IndexFailurePolicy::ContinueDegraded => {
                warn!(?outcome, "index attachment not confirmed, continuing");
                Ok(())
            }
            IndexFailurePolicy::Abort => {
                warn!(?outcome, "index attachment not confirmed, aborting enrichment");
                Err(outcome)
            }
        }
    }
}

/// Filename for an artifact fetched from `artifact_url`: the last path segment,
/// without query or fragment.
fn artifact_filename(artifact_url: &str) -> String {
    Url::parse(artifact_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "artifact.pdf".to_string())
}

/// Delete the job's thread and file, clearing each id once its delete was attempted.
async fn release(assistant: &dyn AssistantService, job: &mut EnrichmentJob) {
    if let Some(thread_id) = job.thread_id.clone() {
        if let Err(e) = assistant.delete_thread(&thread_id).await {
            warn!(thread_id = %thread_id, error = %e, "failed to delete thread");
        }
        job.thread_id = None;
    }
    if let Some(file_id) = job.file_id.clone() {
        if let Err(e) = assistant.delete_file(&file_id).await {
            warn!(file_id = %file_id, error = %e, "failed to delete assistant file");
        }
        job.file_id = None;
    }
}

/// Owns a running job. Dropped before [`release`] finished (the caller's future
/// was cancelled), it deletes the remaining thread and file on a spawned task.
struct JobGuard {
    assistant: Arc<dyn AssistantService>,
    job: EnrichmentJob,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.job.thread_id.is_none() && self.job.file_id.is_none() {
            return;
        }

        let assistant = Arc::clone(&self.assistant);
        let mut job = self.job.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release(assistant.as_ref(), &mut job).await;
                    debug!("released abandoned enrichment job");
                });
            }
            Err(_) => warn!(
                thread_id = ?job.thread_id,
                file_id = ?job.file_id,
                "no runtime left to release abandoned enrichment job"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::testing::FakeAssistant;

    fn settings() -> EnrichmentSettings {
        EnrichmentSettings {
            structured_output: false,
            index_failure: IndexFailurePolicy::ContinueDegraded,
            index_poll: PollPolicy::fixed(3, Duration::from_millis(1)),
            run_poll: PollPolicy::fixed(5, Duration::from_millis(1)),
        }
    }

    fn enricher(fake: &Arc<FakeAssistant>, settings: EnrichmentSettings) -> Enricher {
        Enricher::new(fake.clone(), Client::new(), settings)
    }

    async fn run(enricher: &Enricher) -> EnrichmentResult {
        enricher
            .enrich_bytes("extracted-1.pdf", b"%PDF".to_vec(), "rust", "vs_1", "asst_1")
            .await
    }

    // -- extraction ---------------------------------------------------------

    #[test]
    fn fenced_json_with_citation() {
        let message = "Here you go:\n```json\n{\"a\":1【3:2†source】}\n```";
        let result = extract_json(message, false);
        assert_eq!(result.json, Some(json!({ "a": 1 })));
        assert_eq!(result.outcome, EnrichmentOutcome::Parsed);
    }

    #[test]
    fn single_line_fence() {
        let result = extract_json(r#"```json {"steps":["a","b"]} ```"#, false);
        assert_eq!(result.json, Some(json!({ "steps": ["a", "b"] })));
    }

    #[test]
    fn missing_fence_is_null() {
        let result = extract_json("No JSON here, sorry.", false);
        assert!(result.json.is_none());
        assert_eq!(result.outcome, EnrichmentOutcome::NoFencedBlock);
    }

    #[test]
    fn invalid_json_is_typed() {
        let result = extract_json("```json {not json} ```", false);
        assert!(result.json.is_none());
        assert!(matches!(result.outcome, EnrichmentOutcome::InvalidJson { .. }));
    }

    #[test]
    fn direct_mode_parses_whole_message_then_falls_back() {
        let result = extract_json(r#" {"a":2}【1†doc】 "#, true);
        assert_eq!(result.json, Some(json!({ "a": 2 })));

        let result = extract_json("text ```json {\"b\":3} ```", true);
        assert_eq!(result.json, Some(json!({ "b": 3 })));

        // Direct parsing is off without structured output.
        let result = extract_json(r#"{"a":2}"#, false);
        assert_eq!(result.outcome, EnrichmentOutcome::NoFencedBlock);
    }

    #[test]
    fn prompt_prioritizes_file_and_single_line() {
        let prompt = build_prompt("  learn rust ", false);
        assert!(prompt.contains("Context: learn rust\n"));
        assert!(prompt.contains("primary source"));
        assert!(prompt.contains("single line"));
        assert!(prompt.contains("```json"));
        assert!(build_prompt("x", true).contains("one JSON object"));
    }

    // -- job flow -----------------------------------------------------------

    #[tokio::test]
    async fn happy_path_parses_and_cleans_up() {
        let fake = Arc::new(FakeAssistant::replying("```json\n{\"a\":1}\n```"));
        let result = run(&enricher(&fake, settings())).await;

        assert_eq!(result.json, Some(json!({ "a": 1 })));
        assert_eq!(fake.deleted_threads(), vec!["thread_1".to_string()]);
        assert_eq!(fake.deleted_files(), vec!["file_1".to_string()]);
        assert!(fake.prompts()[0].contains("Context: rust"));
    }

    #[tokio::test]
    async fn upload_failure_aborts_without_cleanup() {
        let fake = Arc::new(FakeAssistant::replying("unused").failing_upload());
        let result = run(&enricher(&fake, settings())).await;

        assert!(result.json.is_none());
        assert!(matches!(result.outcome, EnrichmentOutcome::Failed { .. }));
        assert!(fake.prompts().is_empty());
        assert!(fake.deleted_files().is_empty());
    }

    #[tokio::test]
    async fn index_error_continues_by_default() {
        let fake = Arc::new(
            FakeAssistant::replying("```json {\"ok\":true} ```")
                .with_index_statuses([IndexStatus::InProgress])
                .failing_index_status(),
        );
        let result = run(&enricher(&fake, settings())).await;
        assert_eq!(result.json, Some(json!({ "ok": true })));
        assert_eq!(fake.index_checks(), 1);
    }

    #[tokio::test]
    async fn index_error_aborts_under_abort_policy() {
        let fake = Arc::new(
            FakeAssistant::replying("```json {\"ok\":true} ```")
                .with_index_statuses([IndexStatus::InProgress])
                .failing_index_status(),
        );
        let settings = EnrichmentSettings {
            index_failure: IndexFailurePolicy::Abort,
            ..settings()
        };
        let result = run(&enricher(&fake, settings)).await;

        assert!(result.json.is_none());
        assert!(fake.prompts().is_empty());
        assert_eq!(fake.deleted_files(), vec!["file_1".to_string()]);
    }

    #[tokio::test]
    async fn index_polls_until_completed() {
        let fake = Arc::new(
            FakeAssistant::replying("```json {} ```").with_index_statuses([
                IndexStatus::InProgress,
                IndexStatus::InProgress,
                IndexStatus::Completed,
            ]),
        );
        let result = run(&enricher(&fake, settings())).await;
        assert_eq!(result.json, Some(json!({})));
        // The attach call reports the first status, polling reads the other two.
        assert_eq!(fake.index_checks(), 2);
    }

    #[tokio::test]
    async fn endless_run_times_out_and_cleans_up() {
        let fake = Arc::new(FakeAssistant::replying("unused").run_never_finishes());
        let result = run(&enricher(&fake, settings())).await;

        assert_eq!(
            result.outcome,
            EnrichmentOutcome::TimedOut {
                waiting_for: "run".into()
            }
        );
        assert_eq!(fake.run_checks(), 6);
        assert_eq!(fake.deleted_threads().len(), 1);
        assert_eq!(fake.deleted_files().len(), 1);
    }

    #[tokio::test]
    async fn failed_run_is_typed() {
        let fake = Arc::new(
            FakeAssistant::replying("unused")
                .with_run_statuses([RunStatus::InProgress, RunStatus::Failed]),
        );
        let result = run(&enricher(&fake, settings())).await;
        assert_eq!(
            result.outcome,
            EnrichmentOutcome::RunFailed {
                status: "failed".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_message_is_typed() {
        let fake = Arc::new(FakeAssistant::without_message());
        let result = run(&enricher(&fake, settings())).await;
        assert_eq!(result.outcome, EnrichmentOutcome::NoMessage);
    }

    #[tokio::test]
    async fn cleanup_failures_do_not_change_the_result() {
        let fake = Arc::new(FakeAssistant::replying("```json [1,2] ```").failing_cleanup());
        let result = run(&enricher(&fake, settings())).await;
        assert_eq!(result.json, Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn structured_mode_requests_json_output() {
        let fake = Arc::new(FakeAssistant::replying(r#"{"direct":true}"#));
        let settings = EnrichmentSettings {
            structured_output: true,
            ..settings()
        };
        let result = run(&enricher(&fake, settings)).await;
        assert_eq!(result.json, Some(json!({ "direct": true })));
        assert_eq!(fake.json_runs(), 1);
    }

    #[tokio::test]
    async fn enrich_fetches_artifact_from_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/object/public/pdfs/extracted-5.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.3".to_vec()))
            .mount(&server)
            .await;

        let fake = Arc::new(FakeAssistant::replying("```json {\"a\":1} ```"));
        let url = format!("{}/storage/v1/object/public/pdfs/extracted-5.pdf", server.uri());
        let result = enricher(&fake, settings())
            .enrich(&url, "ctx", "vs_1", "asst_1")
            .await;

        assert_eq!(result.json, Some(json!({ "a": 1 })));
        assert_eq!(fake.uploaded(), vec![("extracted-5.pdf".to_string(), 8)]);
    }

    #[test]
    fn artifact_filename_drops_query_and_fragment() {
        assert_eq!(
            artifact_filename("https://cdn.example.com/pdfs/extracted-7.pdf?token=abc#page=2"),
            "extracted-7.pdf"
        );
        assert_eq!(
            artifact_filename("https://cdn.example.com/pdfs/extracted-7.pdf"),
            "extracted-7.pdf"
        );
        assert_eq!(artifact_filename("https://cdn.example.com/"), "artifact.pdf");
        assert_eq!(artifact_filename("not a url"), "artifact.pdf");
    }

    #[tokio::test]
    async fn signed_artifact_url_uploads_bare_filename() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pdfs/extracted-9.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .mount(&server)
            .await;

        let fake = Arc::new(FakeAssistant::replying("```json {} ```"));
        let url = format!("{}/pdfs/extracted-9.pdf?token=abc", server.uri());
        enricher(&fake, settings())
            .enrich(&url, "ctx", "vs_1", "asst_1")
            .await;

        assert_eq!(fake.uploaded(), vec![("extracted-9.pdf".to_string(), 4)]);
    }

    #[tokio::test]
    async fn cancelled_job_still_releases_thread_and_file() {
        let fake = Arc::new(FakeAssistant::replying("unused").run_never_finishes());
        let settings = EnrichmentSettings {
            run_poll: PollPolicy::fixed(1_000, Duration::from_millis(5)),
            ..settings()
        };
        let enricher = enricher(&fake, settings);

        let cut = tokio::time::timeout(Duration::from_millis(50), run(&enricher)).await;
        assert!(cut.is_err(), "run should still be polling");
        assert!(fake.run_checks() > 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fake.deleted_threads(), vec!["thread_1".to_string()]);
        assert_eq!(fake.deleted_files(), vec!["file_1".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_artifact_is_degraded() {
        let fake = Arc::new(FakeAssistant::replying("unused"));
        let result = enricher(&fake, settings())
            .enrich("http://127.0.0.1:9/missing.pdf", "ctx", "vs_1", "asst_1")
            .await;
        assert!(matches!(result.outcome, EnrichmentOutcome::Failed { .. }));
        assert!(fake.uploaded().is_empty());
    }
}
