//! Document generation: turns extracted text into a paginated PDF artifact.
//!
//! [`ArtifactBuilder::build`] lays out an underlined title and left-aligned
//! body text on A4 pages and runs the rendering on a blocking worker.

pub mod layout;
mod pdf;

use chrono::Utc;
use tracing::{info, instrument};

use pagecast_shared::{Artifact, ArtifactConfig, PagecastError, Result};

use crate::layout::LayoutMetrics;

/// Builds PDF artifacts using the configured fonts, margins, and default title.
#[derive(Debug, Clone, Default)]
pub struct ArtifactBuilder {
    config: ArtifactConfig,
}

impl ArtifactBuilder {
    pub fn new(config: ArtifactConfig) -> Self {
        Self { config }
    }

    /// The title used when a request supplies none.
    pub fn default_title(&self) -> &str {
        &self.config.default_title
    }

    /// `title` when it has visible text, otherwise the configured default.
    pub fn resolve_title<'a>(&'a self, title: Option<&'a str>) -> &'a str {
        title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.config.default_title)
    }

    fn metrics(&self) -> LayoutMetrics {
        LayoutMetrics {
            title_font_size: self.config.title_font_size,
            body_font_size: self.config.body_font_size,
            margin_mm: self.config.margin_mm,
        }
    }

    /// Render `text` under `title` into a PDF artifact named by the current time.
    ///
    /// The bytes are returned only once the document is complete.
    #[instrument(skip_all, fields(text_len = text.len()))]
    pub async fn build(&self, text: &str, title: Option<&str>) -> Result<Artifact> {
        let title = self.resolve_title(title).to_string();
        let text = text.to_string();
        let metrics = self.metrics();
        let stamp = Utc::now().timestamp_millis();

        let bytes = tokio::task::spawn_blocking(move || pdf::render(&title, &text, &metrics))
            .await
            .map_err(|e| PagecastError::ArtifactBuild(format!("render task failed: {e}")))??;

        let artifact = Artifact::pdf(bytes, stamp);
        info!(
            filename = %artifact.filename,
            bytes = artifact.bytes.len(),
            "artifact built"
        );
        Ok(artifact)
    }
}
