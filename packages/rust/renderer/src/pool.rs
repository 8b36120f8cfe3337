//! Bounded pool of reusable browser sessions.
//!
//! A semaphore caps how many sessions are checked out at once. Idle sessions are
//! reused; a session that fails a render is closed instead of being returned.
//! A [`SessionGuard`] dropped without checkin (cancelled request, panic) closes
//! its session on a background task, so no exit path can leak a browser.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};
use url::Url;

use pagecast_shared::{PagecastError, RenderedPage, Result};

use crate::{BrowserLauncher, BrowserSession, RenderOptions, Renderer};

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Renderer backed by at most `max_sessions` concurrently used browser sessions.
pub struct RendererPool<L: BrowserLauncher> {
    inner: Arc<PoolInner<L>>,
}

struct PoolInner<L: BrowserLauncher> {
    launcher: L,
    options: RenderOptions,
    max_sessions: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<L::Session>>,
    /// Sessions launched and not yet closed (idle + checked out).
    live: AtomicUsize,
    /// Sessions currently checked out.
    in_use: AtomicUsize,
}

impl<L: BrowserLauncher> Clone for RendererPool<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: BrowserLauncher> RendererPool<L> {
    /// Create a pool; a `max_sessions` of zero is raised to one.
    pub fn new(launcher: L, options: RenderOptions, max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            inner: Arc::new(PoolInner {
                launcher,
                options,
                max_sessions,
                permits: Arc::new(Semaphore::new(max_sessions)),
                idle: Mutex::new(Vec::with_capacity(max_sessions)),
                live: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Maximum number of sessions in use at once.
    pub fn max_sessions(&self) -> usize {
        self.inner.max_sessions
    }

    /// Sessions launched and not yet closed.
    pub fn live_sessions(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Sessions currently checked out.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Sessions waiting in the pool.
    pub fn idle_sessions(&self) -> usize {
        self.inner.lock_idle().len()
    }

    /// Wait for a permit, then hand out an idle session or launch a new one.
    pub async fn checkout(&self) -> Result<SessionGuard<L>> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PagecastError::Render("renderer pool is shut down".into()))?;

        let reused = self.inner.lock_idle().pop();
        let session = match reused {
            Some(session) => {
                debug!("reusing idle browser session");
                session
            }
            None => {
                let session = self.inner.launcher.launch().await?;
                let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(live, "launched browser session");
                session
            }
        };

        self.inner.in_use.fetch_add(1, Ordering::SeqCst);

        Ok(SessionGuard {
            session: Some(session),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Close every idle session and refuse further checkouts.
    pub async fn shutdown(&self) {
        self.inner.permits.close();
        let sessions: Vec<L::Session> = std::mem::take(&mut *self.inner.lock_idle());
        let count = sessions.len();
        for session in sessions {
            self.inner.close_session(session).await;
        }
        info!(closed = count, "renderer pool shut down");
    }
}

impl<L: BrowserLauncher> PoolInner<L> {
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<L::Session>> {
        // A poisoned lock only means another thread panicked mid-push/pop; the Vec is intact.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn close_session(&self, session: L::Session) {
        if let Err(e) = session.close().await {
            warn!(error = %e, "browser session close failed");
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<L: BrowserLauncher> Renderer for RendererPool<L> {
    #[instrument(skip_all, fields(url = %url))]
    async fn render(&self, url: &Url) -> Result<RenderedPage> {
        let mut guard = self.checkout().await?;

        match guard.session_mut().fetch_html(url, &self.inner.options).await {
            Ok(html) => {
                guard.checkin();
                debug!(html_len = html.len(), "page rendered");
                Ok(RenderedPage {
                    html,
                    source_url: url.clone(),
                })
            }
            Err(e) => {
                warn!(error = %e, "render failed, discarding browser session");
                guard.discard().await;
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// A checked-out session. Holds one pool permit until dropped.
pub struct SessionGuard<L: BrowserLauncher> {
    session: Option<L::Session>,
    pool: Arc<PoolInner<L>>,
    _permit: OwnedSemaphorePermit,
}

impl<L: BrowserLauncher> SessionGuard<L> {
    /// Borrow the session.
    pub fn session_mut(&mut self) -> &mut L::Session {
        self.session
            .as_mut()
            .expect("SessionGuard always holds a session until consumed")
    }

    /// Return the session to the pool for reuse.
    pub fn checkin(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.lock_idle().push(session);
        }
    }

    /// Close the session instead of returning it.
    pub async fn discard(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.close_session(session).await;
        }
    }
}

impl<L: BrowserLauncher> Drop for SessionGuard<L> {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);

        let Some(session) = self.session.take() else {
            return;
        };

        let pool = Arc::clone(&self.pool);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.close_session(session).await;
                    debug!("closed abandoned browser session");
                });
            }
            Err(_) => {
                // No runtime left to run the async close; dropping the session kills the process.
                drop(session);
                pool.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
