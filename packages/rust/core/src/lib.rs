//! Core pipeline orchestration and domain logic for Pagecast.
//!
//! This crate ties together rendering, extraction, artifact generation,
//! storage, and AI enrichment into the three request workflows exposed by
//! [`Pipeline`].

pub mod assistant;
pub mod enrichment;
pub mod pipeline;
pub mod poll;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use assistant::{AssistantService, OpenAiAssistant};
pub use enrichment::{Enricher, EnrichmentSettings};
pub use pipeline::{
    ArtifactResponse, LearningPathResponse, Pipeline, PipelineError, PipelineResult,
    ProgressReporter, SilentProgress, Stage, TextResponse,
};
