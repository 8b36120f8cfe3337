//! Error types for Pagecast.
//!
//! Library crates use [`PagecastError`] via `thiserror`.
//! The binary wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Pagecast operations.
#[derive(Debug, thiserror::Error)]
pub enum PagecastError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The request did not carry a `url` field.
    #[error("missing url")]
    MissingUrl,

    /// The request `url` is not an absolute http(s) URL.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The page did not settle within the navigation timeout.
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// Browser launch, CDP, or page-content failure.
    #[error("render error: {0}")]
    Render(String),

    /// No readable main content could be identified.
    #[error("extraction error: {message}")]
    Extraction { message: String },

    /// Document generation failed.
    #[error("artifact build error: {0}")]
    ArtifactBuild(String),

    /// Object storage rejected or failed the upload.
    #[error("upload error: {0}")]
    Upload(String),

    /// Any failure inside the AI enrichment sub-pipeline.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PagecastError>;

/// Who is able to fix a failure, which decides how it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller sent a bad request.
    Input,
    /// The request was fine but the page holds nothing usable.
    Unprocessable,
    /// Infrastructure the caller cannot fix.
    Server,
}

impl PagecastError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an extraction error from any displayable message.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction {
            message: msg.into(),
        }
    }

    /// Create a navigation error for `url`.
    pub fn navigation(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-url error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify the error for response mapping.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingUrl | Self::InvalidUrl { .. } => ErrorClass::Input,
            Self::Extraction { .. } => ErrorClass::Unprocessable,
            _ => ErrorClass::Server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PagecastError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = PagecastError::navigation("https://example.com", "timed out after 60s");
        assert!(err.to_string().contains("timed out after 60s"));
    }

    #[test]
    fn error_classes() {
        assert_eq!(PagecastError::MissingUrl.class(), ErrorClass::Input);
        assert_eq!(
            PagecastError::invalid_url("nope", "relative URL without a base").class(),
            ErrorClass::Input
        );
        assert_eq!(
            PagecastError::extraction("empty").class(),
            ErrorClass::Unprocessable
        );
        assert_eq!(
            PagecastError::Upload("bucket not found".into()).class(),
            ErrorClass::Server
        );
        assert_eq!(
            PagecastError::ArtifactBuild("font".into()).class(),
            ErrorClass::Server
        );
    }
}
