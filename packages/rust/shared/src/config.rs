//! Application configuration for Pagecast.
//!
//! User config lives at `~/.pagecast/pagecast.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file, only the names of the env vars holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PagecastError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pagecast.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pagecast";

// ---------------------------------------------------------------------------
// Config structs (matching pagecast.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Headless browser settings.
    #[serde(default)]
    pub renderer: RendererConfig,

    /// PDF layout settings.
    #[serde(default)]
    pub artifact: ArtifactConfig,

    /// Object storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// AI assistant settings.
    #[serde(default)]
    pub assistant: AssistantConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Whole-request deadline, the only way to abort an in-flight pipeline.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".into()
}
fn default_request_timeout() -> u64 {
    300
}

/// `[renderer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Maximum time for a page to reach network idle.
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Maximum number of browser sessions in use at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// User agent sent with every navigation.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// `Accept-Language` header sent with every navigation.
    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Explicit Chrome/Chromium binary; autodetected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_executable: Option<String>,

    /// Pass `--no-sandbox` (needed in most containers).
    #[serde(default = "default_true")]
    pub no_sandbox: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: default_navigation_timeout(),
            pool_size: default_pool_size(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            chrome_executable: None,
            no_sandbox: true,
        }
    }
}

impl RendererConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

fn default_navigation_timeout() -> u64 {
    60
}
fn default_pool_size() -> usize {
    2
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/117.0.0.0 Safari/537.36"
        .into()
}
fn default_accept_language() -> String {
    "en-US,en;q=0.9".into()
}
fn default_true() -> bool {
    true
}

/// `[artifact]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Title used when the caller supplies none.
    #[serde(default = "default_title")]
    pub default_title: String,

    /// Heading font size in points.
    #[serde(default = "default_title_font_size")]
    pub title_font_size: f32,

    /// Body font size in points.
    #[serde(default = "default_body_font_size")]
    pub body_font_size: f32,

    /// Page margin on every side, in millimetres.
    #[serde(default = "default_margin_mm")]
    pub margin_mm: f32,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            default_title: default_title(),
            title_font_size: default_title_font_size(),
            body_font_size: default_body_font_size(),
            margin_mm: default_margin_mm(),
        }
    }
}

fn default_title() -> String {
    "Extracted Content".into()
}
fn default_title_font_size() -> f32 {
    18.0
}
fn default_body_font_size() -> f32 {
    12.0
}
fn default_margin_mm() -> f32 {
    20.0
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL of the storage service (without `/storage/v1`).
    #[serde(default = "default_storage_url")]
    pub base_url: String,

    /// Fixed bucket holding every artifact.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Name of the env var holding the service key.
    #[serde(default = "default_storage_key_env")]
    pub api_key_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: default_storage_url(),
            bucket: default_bucket(),
            api_key_env: default_storage_key_env(),
        }
    }
}

fn default_storage_url() -> String {
    "http://127.0.0.1:54321".into()
}
fn default_bucket() -> String {
    "pdfs".into()
}
fn default_storage_key_env() -> String {
    "STORAGE_API_KEY".into()
}

/// What to do when vector-store attachment cannot be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFailurePolicy {
    /// Stop polling and run the assistant anyway.
    #[default]
    ContinueDegraded,
    /// Give up on enrichment.
    Abort,
}

/// Bounded polling settings for one asynchronous wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Maximum number of status checks after the first.
    pub max_attempts: usize,
    /// Delay between checks.
    pub interval_ms: u64,
    /// When set, delays grow exponentially up to this cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval_ms: Option<u64>,
}

/// `[assistant]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// API base URL.
    #[serde(default = "default_assistant_url")]
    pub base_url: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_assistant_key_env")]
    pub api_key_env: String,

    /// Assistant that runs enrichment.
    #[serde(default)]
    pub assistant_id: String,

    /// Vector store the artifact is indexed into.
    #[serde(default)]
    pub vector_store_id: String,

    /// Ask for a JSON-object response instead of a fenced block.
    #[serde(default)]
    pub structured_output: bool,

    /// Behavior when index attachment is not confirmed.
    #[serde(default)]
    pub index_failure: IndexFailurePolicy,

    /// Vector-store attachment wait.
    #[serde(default = "default_index_poll")]
    pub index_poll: PollConfig,

    /// Assistant run wait.
    #[serde(default = "default_run_poll")]
    pub run_poll: PollConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: default_assistant_url(),
            api_key_env: default_assistant_key_env(),
            assistant_id: String::new(),
            vector_store_id: String::new(),
            structured_output: false,
            index_failure: IndexFailurePolicy::default(),
            index_poll: default_index_poll(),
            run_poll: default_run_poll(),
        }
    }
}

impl AssistantConfig {
    /// Enrichment needs both identifiers configured.
    pub fn is_configured(&self) -> bool {
        !self.assistant_id.is_empty() && !self.vector_store_id.is_empty()
    }
}

fn default_assistant_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_assistant_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_index_poll() -> PollConfig {
    PollConfig {
        max_attempts: 30,
        interval_ms: 1_000,
        max_interval_ms: None,
    }
}
fn default_run_poll() -> PollConfig {
    PollConfig {
        max_attempts: 120,
        interval_ms: 500,
        max_interval_ms: Some(5_000),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pagecast/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PagecastError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pagecast/pagecast.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PagecastError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PagecastError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PagecastError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PagecastError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PagecastError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the env var named `var_name`; it must be set and non-empty.
pub fn read_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PagecastError::config(format!(
            "secret not found. Set the {var_name} environment variable."
        ))),
    }
}
