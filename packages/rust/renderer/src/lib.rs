//! Headless page rendering.
//!
//! This crate provides:
//! - [`Renderer`]: the capability the pipeline depends on
//! - [`BrowserLauncher`] / [`BrowserSession`]: the seam a browser backend plugs into
//! - [`RendererPool`]: a bounded pool of reusable sessions with checkout/checkin
//! - [`ChromiumLauncher`]: the Chromium (CDP) backend

pub mod chromium;
pub mod pool;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use pagecast_shared::{RenderedPage, RendererConfig, Result};

pub use chromium::{ChromiumLauncher, ChromiumSession};
pub use pool::{RendererPool, SessionGuard};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Renders a URL to its final, script-executed HTML.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Navigate to `url`, wait for network idle, and return the page HTML.
    async fn render(&self, url: &Url) -> Result<RenderedPage>;
}

/// Starts browser sessions for the pool.
#[async_trait]
pub trait BrowserLauncher: Send + Sync + 'static {
    type Session: BrowserSession;

    /// Start a new browser instance.
    async fn launch(&self) -> Result<Self::Session>;
}

/// One running browser instance.
///
/// Implementations open a fresh page in a fresh browser context per
/// [`fetch_html`](Self::fetch_html) call and dispose of both before returning, so no
/// page state leaks between requests.
#[async_trait]
pub trait BrowserSession: Send + 'static {
    /// Render `url` in a new page and return its HTML.
    async fn fetch_html(&mut self, url: &Url, opts: &RenderOptions) -> Result<String>;

    /// Shut the browser down and release its process.
    async fn close(self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-navigation settings.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Deadline for the page to reach network idle.
    pub navigation_timeout: Duration,
    /// User agent override.
    pub user_agent: String,
    /// `Accept-Language` header value.
    pub accept_language: String,
}

impl From<&RendererConfig> for RenderOptions {
    fn from(config: &RendererConfig) -> Self {
        Self {
            navigation_timeout: config.navigation_timeout(),
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from(&RendererConfig::default())
    }
}
