//! Core domain types handed from stage to stage in the pipeline.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{PagecastError, Result};

/// Content type of every artifact the pipeline produces.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper tagging one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new time-sortable request identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FetchRequest
// ---------------------------------------------------------------------------

/// Input to the pipeline, from a query string or a JSON body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Page to process. Kept optional so absence is reported, not rejected by serde.
    #[serde(default)]
    pub url: Option<String>,
    /// Free-form context forwarded to enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FetchRequest {
    /// Build a request for `url` without a description.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            description: None,
        }
    }

    /// Attach an enrichment description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate and parse the target URL.
    ///
    /// A missing or blank `url` is [`PagecastError::MissingUrl`]; anything that is
    /// not an absolute `http`/`https` URL with a host is [`PagecastError::InvalidUrl`].
    pub fn target(&self) -> Result<Url> {
        let raw = match self.url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(PagecastError::MissingUrl),
        };

        let url = Url::parse(raw).map_err(|e| PagecastError::invalid_url(raw, e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(PagecastError::invalid_url(
                    raw,
                    format!("unsupported scheme '{other}'"),
                ));
            }
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(PagecastError::invalid_url(raw, "URL has no host"));
        }

        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Stage outputs
// ---------------------------------------------------------------------------

/// Fully rendered HTML for a URL. Not persisted.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub source_url: Url,
}

/// Canonical readable article extracted from a rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedArticle {
    /// Article title.
    pub title: String,
    /// Plain text body, paragraphs separated by a blank line. Never empty.
    pub text: String,
    /// Author line, when the page declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byline: Option<String>,
    /// Short description (`meta[name=description]` or first paragraph).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    /// Publishing site name (`og:site_name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    /// Document language (`<html lang>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// `<link rel=canonical>` resolved against the source URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    /// Whitespace-delimited word count of `text`.
    pub word_count: usize,
}

/// A generated document ready for upload.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
}

impl Artifact {
    /// Wrap PDF bytes generated at `unix_millis`.
    pub fn pdf(bytes: Vec<u8>, unix_millis: i64) -> Self {
        Self {
            bytes,
            content_type: PDF_CONTENT_TYPE,
            filename: pdf_filename(unix_millis),
        }
    }
}

/// Artifact naming convention: `extracted-<unixTimeMillis>.pdf`.
pub fn pdf_filename(unix_millis: i64) -> String {
    format!("extracted-{unix_millis}.pdf")
}

/// An artifact persisted in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub filename: String,
    pub public_url: String,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// Lifecycle of one enrichment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Uploaded,
    Indexing,
    Indexed,
    IndexFailed,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Uploaded => 1,
            Self::Indexing => 2,
            Self::Indexed | Self::IndexFailed => 3,
            Self::Running => 4,
            Self::Completed | Self::Failed => 5,
        }
    }

    /// `true` once the job cannot move any further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Uploaded => "uploaded",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
            Self::IndexFailed => "index_failed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Identifiers and status of one enrichment run. Never reused across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentJob {
    pub file_id: Option<String>,
    pub vector_store_id: String,
    pub thread_id: Option<String>,
    pub run_id: Option<String>,
    pub status: JobStatus,
}

impl EnrichmentJob {
    pub fn new(vector_store_id: impl Into<String>) -> Self {
        Self {
            file_id: None,
            vector_store_id: vector_store_id.into(),
            thread_id: None,
            run_id: None,
            status: JobStatus::Created,
        }
    }

    /// Move to `next` if that is a forward transition.
    ///
    /// Returns `false` (and leaves the status untouched) for backward moves and
    /// for any move out of a terminal status.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            tracing::warn!(
                from = self.status.as_str(),
                to = next.as_str(),
                "rejected non-monotonic job transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}

/// Why an enrichment produced the JSON it did (or `null`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    /// The final message held a parseable JSON payload.
    Parsed,
    /// The thread had no assistant message to read.
    NoMessage,
    /// The final message had no fenced JSON block.
    NoFencedBlock,
    /// A payload was found but did not parse.
    InvalidJson { message: String },
    /// The run reached a non-success terminal status.
    RunFailed { status: String },
    /// A poll policy ran out of attempts.
    TimedOut { waiting_for: String },
    /// The enrichment step itself failed and was recovered.
    Failed { message: String },
}

/// Structured JSON produced by enrichment. `json == None` means degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub json: Option<serde_json::Value>,
    pub outcome: EnrichmentOutcome,
}

impl EnrichmentResult {
    pub fn parsed(json: serde_json::Value) -> Self {
        Self {
            json: Some(json),
            outcome: EnrichmentOutcome::Parsed,
        }
    }

    pub fn degraded(outcome: EnrichmentOutcome) -> Self {
        Self { json: None, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_time_sortable() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert!(a.0 <= b.0);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn missing_and_blank_urls_are_missing() {
        assert!(matches!(
            FetchRequest::default().target(),
            Err(PagecastError::MissingUrl)
        ));
        assert!(matches!(
            FetchRequest::new("   ").target(),
            Err(PagecastError::MissingUrl)
        ));
    }

    #[test]
    fn relative_and_non_http_urls_are_invalid() {
        for raw in ["/just/a/path", "ftp://example.com/file", "mailto:me@example.com"] {
            let err = FetchRequest::new(raw).target().unwrap_err();
            assert!(
                matches!(err, PagecastError::InvalidUrl { .. }),
                "{raw} should be invalid, got {err}"
            );
        }
    }

    #[test]
    fn absolute_url_parses() {
        let url = FetchRequest::new(" https://example.com/post?id=1 ")
            .target()
            .unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.query(), Some("id=1"));
    }

    #[test]
    fn fetch_request_deserializes_without_url() {
        let req: FetchRequest = serde_json::from_str(r#"{"description":"rust"}"#).unwrap();
        assert!(req.url.is_none());
        assert_eq!(req.description.as_deref(), Some("rust"));
    }

    #[test]
    fn artifact_naming() {
        let artifact = Artifact::pdf(b"%PDF-1.3".to_vec(), 1_700_000_000_123);
        assert_eq!(artifact.filename, "extracted-1700000000123.pdf");
        assert_eq!(artifact.content_type, "application/pdf");
    }

    #[test]
    fn job_transitions_are_monotonic() {
        let mut job = EnrichmentJob::new("vs_1");
        assert!(job.advance(JobStatus::Uploaded));
        assert!(job.advance(JobStatus::Indexing));
        assert!(job.advance(JobStatus::IndexFailed));
        // Indexed sits at the same rank as IndexFailed.
        assert!(!job.advance(JobStatus::Indexed));
        assert!(!job.advance(JobStatus::Uploaded));
        assert!(job.advance(JobStatus::Running));
        assert!(job.advance(JobStatus::Completed));
        assert!(!job.advance(JobStatus::Failed));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn failure_reachable_before_running() {
        let mut job = EnrichmentJob::new("vs_1");
        assert!(job.advance(JobStatus::Uploaded));
        assert!(job.advance(JobStatus::Failed));
        assert!(job.status.is_terminal());
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let outcome = EnrichmentOutcome::TimedOut {
            waiting_for: "run".into(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"kind":"timed_out","waiting_for":"run"}"#);
    }
}
