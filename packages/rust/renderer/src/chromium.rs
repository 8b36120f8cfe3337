//! Chromium backend over the DevTools protocol.

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use pagecast_shared::{PagecastError, RendererConfig, Result};

use crate::{BrowserLauncher, BrowserSession, RenderOptions};

/// Lifecycle events that count as "network idle" (at most two open connections, or none).
const IDLE_EVENTS: [&str; 2] = ["networkAlmostIdle", "networkIdle"];

fn cdp_error(context: &str, e: impl std::fmt::Display) -> PagecastError {
    PagecastError::Render(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Launches headless Chromium processes.
pub struct ChromiumLauncher {
    config: RendererConfig,
}

impl ChromiumLauncher {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder();
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| cdp_error("invalid browser config", e))
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    type Session = ChromiumSession;

    async fn launch(&self) -> Result<ChromiumSession> {
        let (browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(|e| cdp_error("failed to launch browser", e))?;

        // The handler drives the CDP websocket and must be polled for the browser to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        info!("launched headless browser");
        Ok(ChromiumSession {
            browser,
            handler_task,
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One Chromium process plus its CDP handler task.
pub struct ChromiumSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    /// Each render gets its own incognito browser context, so cookies, storage,
    /// cache, and service workers never carry over to the next checkout.
    async fn fetch_html(&mut self, url: &Url, opts: &RenderOptions) -> Result<String> {
        let context_id = self
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| cdp_error("failed to create browser context", e))?;

        let result = match CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
        {
            Ok(target) => match self.browser.new_page(target).await {
                Ok(page) => {
                    let result = navigate(&page, url, opts).await;
                    if let Err(e) = page.close().await {
                        warn!(%url, error = %e, "failed to close page");
                    }
                    result
                }
                Err(e) => Err(cdp_error("failed to open page", e)),
            },
            Err(e) => Err(cdp_error("invalid target params", e)),
        };

        if let Err(e) = self.browser.dispose_browser_context(context_id).await {
            warn!(%url, error = %e, "failed to dispose browser context");
        }

        result
    }

    async fn close(mut self) -> Result<()> {
        let closed = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "waiting for browser exit failed");
        }
        self.handler_task.abort();
        closed
            .map(|_| ())
            .map_err(|e| cdp_error("failed to close browser", e))
    }
}

/// Configure the page, navigate, wait for network idle, and read the DOM.
async fn navigate(page: &Page, url: &Url, opts: &RenderOptions) -> Result<String> {
    page.set_user_agent(SetUserAgentOverrideParams::new(opts.user_agent.clone()))
        .await
        .map_err(|e| cdp_error("failed to set user agent", e))?;

    page.execute(EnableParams::default())
        .await
        .map_err(|e| cdp_error("failed to enable network domain", e))?;

    let headers = Headers::new(serde_json::json!({ "Accept-Language": opts.accept_language }));
    page.execute(SetExtraHttpHeadersParams::new(headers))
        .await
        .map_err(|e| cdp_error("failed to set extra headers", e))?;

    page.execute(SetLifecycleEventsEnabledParams::new(true))
        .await
        .map_err(|e| cdp_error("failed to enable lifecycle events", e))?;

    let mut lifecycle = page
        .event_listener::<EventLifecycleEvent>()
        .await
        .map_err(|e| cdp_error("failed to subscribe to lifecycle events", e))?;

    let settle = async {
        page.goto(url.as_str())
            .await
            .map_err(|e| PagecastError::navigation(url.as_str(), e.to_string()))?;

        let main_frame = page
            .mainframe()
            .await
            .map_err(|e| cdp_error("failed to resolve main frame", e))?;

        // Only idle events after the main frame's own navigation started count.
        let mut navigation_started = false;
        while let Some(event) = lifecycle.next().await {
            if main_frame.as_ref().is_some_and(|frame| *frame != event.frame_id) {
                continue;
            }
            if event.name == "init" {
                navigation_started = true;
            } else if navigation_started && IDLE_EVENTS.contains(&event.name.as_str()) {
                debug!(event = %event.name, "page reached network idle");
                return Ok(());
            }
        }

        // Event stream ended (page closed or CDP gone); `goto` already saw `load`.
        Ok::<(), PagecastError>(())
    };

    match tokio::time::timeout(opts.navigation_timeout, settle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(PagecastError::navigation(
                url.as_str(),
                format!(
                    "page did not reach network idle within {}s",
                    opts.navigation_timeout.as_secs()
                ),
            ));
        }
    }

    page.content()
        .await
        .map_err(|e| cdp_error("failed to read page content", e))
}
