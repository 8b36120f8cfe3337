//! Assistant service client.
//!
//! [`AssistantService`] is every sub-call enrichment makes: file upload,
//! vector-store attachment, threads, runs, messages, and cleanup.
//! [`OpenAiAssistant`] implements it against the Assistants v2 REST API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use pagecast_shared::{AssistantConfig, PagecastError, Result, read_secret};

/// Value of the `OpenAI-Beta` header the v2 endpoints require.
const ASSISTANTS_BETA: &str = "assistants=v2";

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Processing status of a file attached to a vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
    #[serde(other)]
    Unknown,
}

impl IndexStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

/// Status of an assistant run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// The run will not change state any more. `requires_action` counts, since
    /// enrichment never submits tool outputs.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::RequiresAction
                | Self::Cancelled
                | Self::Failed
                | Self::Completed
                | Self::Incomplete
                | Self::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The assistant-service calls enrichment is built from.
#[async_trait]
pub trait AssistantService: Send + Sync {
    /// Upload `bytes` as an assistant file and return its id.
    async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<String>;

    /// Attach an uploaded file to a vector store.
    async fn attach_file(&self, vector_store_id: &str, file_id: &str) -> Result<IndexStatus>;

    /// Current attachment status of a file in a vector store.
    async fn index_status(&self, vector_store_id: &str, file_id: &str) -> Result<IndexStatus>;

    /// Create a thread holding one user message, returning the thread id.
    async fn create_thread(&self, message: &str) -> Result<String>;

    /// Start a run of `assistant_id` over a thread, returning the run id.
    async fn create_run(&self, thread_id: &str, assistant_id: &str, json_output: bool)
    -> Result<String>;

    /// Current status of a run.
    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus>;

    /// Text of the newest message in a thread, if there is one.
    async fn latest_message(&self, thread_id: &str) -> Result<Option<String>>;

    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    async fn delete_file(&self, file_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// REST client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IndexFileResponse {
    status: IndexStatus,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    status: RunStatus,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

impl Message {
    /// Concatenated text parts; `None` when the message has no text.
    fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.as_ref().map(|t| t.value.as_str()))
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }
}

/// Assistants v2 REST client.
#[derive(Clone)]
pub struct OpenAiAssistant {
    http: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAssistant")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiAssistant {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build a client reading the API key from `config.api_key_env`.
    pub fn from_config(http: Client, config: &AssistantConfig) -> Result<Self> {
        let key = read_secret(&config.api_key_env)?;
        Ok(Self::new(http, &config.base_url, key))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA)
    }

    async fn send(&self, op: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| PagecastError::Enrichment(format!("{op}: {e}")))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(body);
        Err(PagecastError::Enrichment(format!(
            "{op} failed ({status}): {message}"
        )))
    }

    async fn send_json<T: DeserializeOwned>(&self, op: &str, request: RequestBuilder) -> Result<T> {
        self.send(op, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PagecastError::Enrichment(format!("{op}: unexpected response: {e}")))
    }
}

#[async_trait]
impl AssistantService for OpenAiAssistant {
    #[instrument(skip_all, fields(filename = %filename, bytes = bytes.len()))]
    async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<String> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(pagecast_shared::PDF_CONTENT_TYPE)
            .map_err(|e| PagecastError::Enrichment(format!("upload file: {e}")))?;
        let form = Form::new().text("purpose", "assistants").part("file", part);

        let file: IdResponse = self
            .send_json("upload file", self.request(Method::POST, "/files").multipart(form))
            .await?;
        debug!(file_id = %file.id, "assistant file uploaded");
        Ok(file.id)
    }

    async fn attach_file(&self, vector_store_id: &str, file_id: &str) -> Result<IndexStatus> {
        let path = format!("/vector_stores/{vector_store_id}/files");
        let attached: IndexFileResponse = self
            .send_json(
                "attach file",
                self.request(Method::POST, &path)
                    .json(&json!({ "file_id": file_id })),
            )
            .await?;
        Ok(attached.status)
    }

    async fn index_status(&self, vector_store_id: &str, file_id: &str) -> Result<IndexStatus> {
        let path = format!("/vector_stores/{vector_store_id}/files/{file_id}");
        let file: IndexFileResponse = self
            .send_json("index status", self.request(Method::GET, &path))
            .await?;
        Ok(file.status)
    }

    async fn create_thread(&self, message: &str) -> Result<String> {
        let body = json!({ "messages": [{ "role": "user", "content": message }] });
        let thread: IdResponse = self
            .send_json(
                "create thread",
                self.request(Method::POST, "/threads").json(&body),
            )
            .await?;
        Ok(thread.id)
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        json_output: bool,
    ) -> Result<String> {
        let mut body = json!({ "assistant_id": assistant_id });
        if json_output {
            body["response_format"] = json!({ "type": "json_object" });
        }
        let path = format!("/threads/{thread_id}/runs");
        let run: IdResponse = self
            .send_json("create run", self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(run.id)
    }

    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus> {
        let path = format!("/threads/{thread_id}/runs/{run_id}");
        let run: RunResponse = self
            .send_json("run status", self.request(Method::GET, &path))
            .await?;
        Ok(run.status)
    }

    async fn latest_message(&self, thread_id: &str) -> Result<Option<String>> {
        let path = format!("/threads/{thread_id}/messages");
        let list: MessageList = self
            .send_json(
                "list messages",
                self.request(Method::GET, &path)
                    .query(&[("order", "desc"), ("limit", "1")]),
            )
            .await?;
        Ok(list.data.first().and_then(Message::text))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let path = format!("/threads/{thread_id}");
        self.send("delete thread", self.request(Method::DELETE, &path))
            .await
            .map(|_| ())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let path = format!("/files/{file_id}");
        self.send("delete file", self.request(Method::DELETE, &path))
            .await
            .map(|_| ())
    }
}
