//! In-process fakes for pipeline and enrichment tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use url::Url;

use pagecast_renderer::Renderer;
use pagecast_shared::{PagecastError, RenderedPage, Result};

use crate::assistant::{AssistantService, IndexStatus, RunStatus};

/// A long-form article page with site chrome around it.
pub const LONG_ARTICLE_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <title>A Field Guide to Rust Lifetimes | Example Engineering</title>
  <meta name="description" content="How lifetimes keep references valid.">
  <meta property="og:site_name" content="Example Engineering">
</head>
<body>
  <header><nav><a href="/">Home</a> <a href="/blog">Blog</a> <a href="/jobs">Jobs</a></nav></header>
  <main>
    <article>
      <h1>A Field Guide to Rust Lifetimes</h1>
      <p>Lifetimes describe how long a reference stays valid, and the compiler uses them to reject dangling pointers before a program ever runs.</p>
      <p>Most of the time lifetimes are inferred, so annotations only appear where a function returns a reference tied to one of several inputs.</p>
      <p>Structs that hold references carry a lifetime parameter too, which ties the struct to the data it borrows and keeps both in step.</p>
      <p>The static lifetime marks data that lives for the whole program, such as string literals, and it is rarely what a signature really needs.</p>
    </article>
  </main>
  <aside class="related-posts"><p>Related: ten more posts you might enjoy reading this week, and next.</p></aside>
  <footer><p>Copyright Example Engineering, 2024. All rights reserved, worldwide.</p></footer>
</body>
</html>"#;

/// Title [`LONG_ARTICLE_HTML`] extracts to.
pub const LONG_ARTICLE_TITLE: &str = "A Field Guide to Rust Lifetimes";

/// A client-rendered shell with no readable content.
pub const EMPTY_SHELL_HTML: &str =
    r#"<html><head><title>App</title></head><body><div id="root"></div><script src="/app.js"></script></body></html>"#;

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renderer answering every URL with the same HTML or error.
pub struct StaticRenderer {
    reply: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl StaticRenderer {
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            reply: Ok(html.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every render fails with a navigation error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn render(&self, url: &Url) -> Result<RenderedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Ok(html) => Ok(RenderedPage {
                html: html.clone(),
                source_url: url.clone(),
            }),
            Err(message) => Err(PagecastError::navigation(url.as_str(), message.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Assistant
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Record {
    uploaded: Vec<(String, usize)>,
    prompts: Vec<String>,
    deleted_threads: Vec<String>,
    deleted_files: Vec<String>,
}

/// Scripted [`AssistantService`].
///
/// Index and run statuses are served from queues; once a queue is empty the
/// job reports completed. Ids are `file_1`, `thread_1`, `run_1`.
pub struct FakeAssistant {
    reply: Option<String>,
    index_statuses: Mutex<VecDeque<IndexStatus>>,
    run_statuses: Mutex<VecDeque<RunStatus>>,
    run_never_finishes: bool,
    fail_upload: bool,
    fail_index_status: bool,
    fail_cleanup: bool,
    index_checks: AtomicUsize,
    run_checks: AtomicUsize,
    json_runs: AtomicUsize,
    record: Mutex<Record>,
}

impl FakeAssistant {
    /// Runs complete and the latest message is `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self::with_reply(Some(reply.into()))
    }

    /// Runs complete but the thread holds no message.
    pub fn without_message() -> Self {
        Self::with_reply(None)
    }

    fn with_reply(reply: Option<String>) -> Self {
        Self {
            reply,
            index_statuses: Mutex::new(VecDeque::new()),
            run_statuses: Mutex::new(VecDeque::new()),
            run_never_finishes: false,
            fail_upload: false,
            fail_index_status: false,
            fail_cleanup: false,
            index_checks: AtomicUsize::new(0),
            run_checks: AtomicUsize::new(0),
            json_runs: AtomicUsize::new(0),
            record: Mutex::new(Record::default()),
        }
    }

    /// Statuses returned by the attach call and then by each index check.
    pub fn with_index_statuses(self, statuses: impl IntoIterator<Item = IndexStatus>) -> Self {
        *self.index_statuses.lock().unwrap() = statuses.into_iter().collect();
        self
    }

    /// Statuses returned by successive run checks.
    pub fn with_run_statuses(self, statuses: impl IntoIterator<Item = RunStatus>) -> Self {
        *self.run_statuses.lock().unwrap() = statuses.into_iter().collect();
        self
    }

    pub fn run_never_finishes(mut self) -> Self {
        self.run_never_finishes = true;
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    /// Index checks fail; the attach call itself still succeeds.
    pub fn failing_index_status(mut self) -> Self {
        self.fail_index_status = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    /// `(filename, byte length)` of every uploaded file.
    pub fn uploaded(&self) -> Vec<(String, usize)> {
        self.record.lock().unwrap().uploaded.clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.record.lock().unwrap().prompts.clone()
    }

    pub fn deleted_threads(&self) -> Vec<String> {
        self.record.lock().unwrap().deleted_threads.clone()
    }

    pub fn deleted_files(&self) -> Vec<String> {
        self.record.lock().unwrap().deleted_files.clone()
    }

    pub fn index_checks(&self) -> usize {
        self.index_checks.load(Ordering::SeqCst)
    }

    pub fn run_checks(&self) -> usize {
        self.run_checks.load(Ordering::SeqCst)
    }

    /// Runs created with JSON-object output requested.
    pub fn json_runs(&self) -> usize {
        self.json_runs.load(Ordering::SeqCst)
    }

    fn next_index_status(&self) -> IndexStatus {
        self.index_statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(IndexStatus::Completed)
    }
}

fn service_error(op: &str) -> PagecastError {
    PagecastError::Enrichment(format!("{op} failed (500 Internal Server Error): fake outage"))
}

#[async_trait]
impl AssistantService for FakeAssistant {
    async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<String> {
        if self.fail_upload {
            return Err(service_error("upload file"));
        }
        self.record
            .lock()
            .unwrap()
            .uploaded
            .push((filename.to_string(), bytes.len()));
        Ok("file_1".into())
    }

    async fn attach_file(&self, _vector_store_id: &str, _file_id: &str) -> Result<IndexStatus> {
        Ok(self.next_index_status())
    }

    async fn index_status(&self, _vector_store_id: &str, _file_id: &str) -> Result<IndexStatus> {
        self.index_checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_index_status {
            return Err(service_error("index status"));
        }
        Ok(self.next_index_status())
    }

    async fn create_thread(&self, message: &str) -> Result<String> {
        self.record.lock().unwrap().prompts.push(message.to_string());
        Ok("thread_1".into())
    }

    async fn create_run(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
        json_output: bool,
    ) -> Result<String> {
        if json_output {
            self.json_runs.fetch_add(1, Ordering::SeqCst);
        }
        Ok("run_1".into())
    }

    async fn run_status(&self, _thread_id: &str, _run_id: &str) -> Result<RunStatus> {
        self.run_checks.fetch_add(1, Ordering::SeqCst);
        if self.run_never_finishes {
            return Ok(RunStatus::InProgress);
        }
        Ok(self
            .run_statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunStatus::Completed))
    }

    async fn latest_message(&self, _thread_id: &str) -> Result<Option<String>> {
        Ok(self.reply.clone())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.record
            .lock()
            .unwrap()
            .deleted_threads
            .push(thread_id.to_string());
        if self.fail_cleanup {
            return Err(service_error("delete thread"));
        }
        Ok(())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.record
            .lock()
            .unwrap()
            .deleted_files
            .push(file_id.to_string());
        if self.fail_cleanup {
            return Err(service_error("delete file"));
        }
        Ok(())
    }
}
