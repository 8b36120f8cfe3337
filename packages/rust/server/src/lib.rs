//! HTTP surface for the Pagecast pipeline.

pub mod error;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderName, Request};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use pagecast_core::{
    ArtifactResponse, LearningPathResponse, Pipeline, PipelineResult, SilentProgress, TextResponse,
};
use pagecast_shared::FetchRequest;

pub use crate::error::ApiError;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

/// Handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    request_timeout: Duration,
}

impl AppState {
    /// Enrichment inside `pipeline` is bounded by `request_timeout` too, so a
    /// slow assistant degrades the result instead of failing the request.
    pub fn new(pipeline: Pipeline, request_timeout: Duration) -> Self {
        Self {
            pipeline: pipeline.with_request_deadline(request_timeout),
            request_timeout,
        }
    }

    /// Run one pipeline operation under the request deadline.
    ///
    /// On timeout the operation future is dropped, which releases any browser
    /// session it holds.
    async fn within<T>(&self, run: impl Future<Output = PipelineResult<T>>) -> Result<T, ApiError> {
        match tokio::time::timeout(self.request_timeout, run).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => Err(ApiError::timeout(self.request_timeout)),
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ExtractQuery {
    url: Option<String>,
    title: Option<String>,
}

impl ExtractQuery {
    fn request(&self) -> FetchRequest {
        FetchRequest {
            url: self.url.clone(),
            description: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

async fn extract_text(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
) -> Result<Json<TextResponse>, ApiError> {
    let request = query.request();
    let article = state
        .within(state.pipeline.extract_text(&request, &SilentProgress))
        .await?;
    Ok(Json(article.into()))
}

async fn extract_pdf(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
) -> Result<Json<ArtifactResponse>, ApiError> {
    let request = query.request();
    let response = state
        .within(
            state
                .pipeline
                .extract_artifact(&request, query.title.as_deref(), &SilentProgress),
        )
        .await?;
    Ok(Json(response))
}

async fn generate_learning_path(
    State(state): State<AppState>,
    body: Result<Json<FetchRequest>, JsonRejection>,
) -> Result<Json<LearningPathResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::bad_body(rejection.body_text()))?;
    let response = state
        .within(
            state
                .pipeline
                .generate_learning_path(&request, &SilentProgress),
        )
        .await?;
    Ok(Json(response))
}

/// Routes without the tracing and request-id layers.
pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/extract", get(extract_text))
        .route("/extract/pdf", get(extract_pdf))
        .route("/generateLearningPath", post(generate_learning_path))
        .with_state(state)
}

/// The full application: routes plus tracing and `x-request-id` propagation.
pub fn build_app_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id
            )
        })
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &tracing::Span| {
                let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
                tracing::info!(
                    parent: span,
                    status = response.status().as_u16(),
                    latency_ms,
                    "request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, span: &tracing::Span| {
                let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
                tracing::warn!(parent: span, latency_ms, error = %error, "request failed");
            },
        );

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    build_api_router(state)
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }
    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

/// Bind `listen_addr` and serve until Ctrl+C or SIGTERM.
pub async fn serve(listen_addr: &str, state: AppState) -> Result<(), ServerError> {
    let addr = parse_listen_addr(listen_addr)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr().unwrap_or(addr);
    tracing::info!(%local_addr, "pagecast server listening");

    axum::serve(listener, build_app_router(state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .map_err(|source| ServerError::Serve { source })?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to capture Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, draining"),
        _ = sigterm => tracing::info!("received SIGTERM, draining"),
    }
}
