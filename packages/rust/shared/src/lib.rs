//! Shared types, error model, and configuration for Pagecast.
//!
//! This crate is the foundation depended on by all other Pagecast crates.
//! It provides:
//! - [`PagecastError`]: the unified error type
//! - Domain types handed between pipeline stages ([`FetchRequest`], [`RenderedPage`],
//!   [`ExtractedArticle`], [`Artifact`], [`StoredArtifact`], [`EnrichmentJob`])
//! - Configuration ([`AppConfig`], config loading, secret lookup)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ArtifactConfig, AssistantConfig, IndexFailurePolicy, PollConfig, RendererConfig,
    ServerConfig, StorageConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, read_secret,
};
pub use error::{ErrorClass, PagecastError, Result};
pub use types::{
    Artifact, EnrichmentJob, EnrichmentOutcome, EnrichmentResult, ExtractedArticle, FetchRequest,
    JobStatus, PDF_CONTENT_TYPE, RenderedPage, RequestId, StoredArtifact, pdf_filename,
};
