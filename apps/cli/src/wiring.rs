//! Builds the long-lived service handles from configuration.

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use tracing::{info, warn};

use pagecast_artifacts::ArtifactBuilder;
use pagecast_core::{Enricher, EnrichmentSettings, OpenAiAssistant, Pipeline};
use pagecast_renderer::{ChromiumLauncher, RenderOptions, RendererPool};
use pagecast_shared::AppConfig;
use pagecast_storage::{ArtifactStore, BucketStore, MemoryStore};

/// Dry-run artifacts kept in memory before the oldest are evicted.
const DRY_RUN_MAX_OBJECTS: usize = 64;

/// A pipeline plus the browser pool behind it, kept for shutdown.
pub(crate) struct Services {
    pub pipeline: Pipeline,
    pub pool: RendererPool<ChromiumLauncher>,
}

impl Services {
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

/// Wire every stage from `config`.
///
/// With `dry_run` artifacts stay in memory and no storage credentials are needed.
pub(crate) fn build_services(config: &AppConfig, dry_run: bool) -> Result<Services> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("pagecast/", env!("CARGO_PKG_VERSION")))
        .build()
        .wrap_err("failed to build HTTP client")?;

    let pool = RendererPool::new(
        ChromiumLauncher::new(config.renderer.clone()),
        RenderOptions::from(&config.renderer),
        config.renderer.pool_size,
    );

    let store: Arc<dyn ArtifactStore> = if dry_run {
        info!(max_objects = DRY_RUN_MAX_OBJECTS, "dry run: artifacts are kept in memory");
        Arc::new(MemoryStore::default().with_max_objects(DRY_RUN_MAX_OBJECTS))
    } else {
        Arc::new(
            BucketStore::from_config(http.clone(), &config.storage)
                .wrap_err("storage is not configured (use --dry-run to skip uploads)")?,
        )
    };

    let mut pipeline = Pipeline::new(
        Arc::new(pool.clone()),
        ArtifactBuilder::new(config.artifact.clone()),
        store,
    );

    let assistant = &config.assistant;
    if assistant.is_configured() {
        match OpenAiAssistant::from_config(http.clone(), assistant) {
            Ok(client) => {
                let enricher =
                    Enricher::new(Arc::new(client), http, EnrichmentSettings::from(assistant));
                pipeline = pipeline.with_enrichment(
                    enricher,
                    &assistant.vector_store_id,
                    &assistant.assistant_id,
                );
            }
            Err(e) => warn!(error = %e, "assistant credentials missing, enrichment disabled"),
        }
    } else {
        info!("assistant ids not configured, enrichment disabled");
    }

    Ok(Services { pipeline, pool })
}
