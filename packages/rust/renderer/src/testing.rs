//! Scripted browser backend for tests.
//!
//! [`ScriptedLauncher`] hands out sessions that answer every navigation the same
//! way, and counts launches, closes, and concurrent renders.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use pagecast_shared::{PagecastError, Result};

use crate::{BrowserLauncher, BrowserSession, RenderOptions};

/// How every session from a [`ScriptedLauncher`] responds.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return this HTML immediately.
    Html(String),
    /// Return this HTML after a delay.
    Delayed { html: String, delay: Duration },
    /// Fail as if the page never reached network idle.
    NavigationTimeout,
    /// Never finish.
    Hang,
}

impl Script {
    pub fn html(html: impl Into<String>) -> Self {
        Self::Html(html.into())
    }
}

/// Shared counters observed by tests.
#[derive(Debug, Default)]
pub struct LauncherStats {
    launched: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    max_concurrent: AtomicUsize,
    seen: std::sync::Mutex<Vec<RenderOptions>>,
}

impl LauncherStats {
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sessions launched and not yet closed.
    pub fn open(&self) -> usize {
        self.launched() - self.closed()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Options passed to `fetch_html`, in call order.
    pub fn options_seen(&self) -> Vec<RenderOptions> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

/// Launcher producing [`ScriptedSession`]s.
pub struct ScriptedLauncher {
    script: Script,
    stats: Arc<LauncherStats>,
    fail_launch: AtomicBool,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            stats: Arc::new(LauncherStats::default()),
            fail_launch: AtomicBool::new(false),
        }
    }

    /// Make every `launch` fail.
    pub fn failing_launch(self) -> Self {
        self.fail_launch.store(true, Ordering::SeqCst);
        self
    }

    pub fn stats(&self) -> Arc<LauncherStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    type Session = ScriptedSession;

    async fn launch(&self) -> Result<ScriptedSession> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(PagecastError::Render("failed to launch browser: no binary".into()));
        }
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            script: self.script.clone(),
            stats: Arc::clone(&self.stats),
        })
    }
}

/// Session that follows its launcher's [`Script`].
pub struct ScriptedSession {
    script: Script,
    stats: Arc<LauncherStats>,
}

struct ActiveRender<'a>(&'a LauncherStats);

impl<'a> ActiveRender<'a> {
    fn enter(stats: &'a LauncherStats) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_concurrent.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveRender<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn fetch_html(&mut self, url: &Url, opts: &RenderOptions) -> Result<String> {
        if let Ok(mut seen) = self.stats.seen.lock() {
            seen.push(opts.clone());
        }
        let _active = ActiveRender::enter(&self.stats);

        match &self.script {
            Script::Html(html) => Ok(html.clone()),
            Script::Delayed { html, delay } => {
                tokio::time::sleep(*delay).await;
                Ok(html.clone())
            }
            Script::NavigationTimeout => Err(PagecastError::navigation(
                url.as_str(),
                format!(
                    "page did not reach network idle within {}s",
                    opts.navigation_timeout.as_secs()
                ),
            )),
            Script::Hang => std::future::pending().await,
        }
    }

    async fn close(self) -> Result<()> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
