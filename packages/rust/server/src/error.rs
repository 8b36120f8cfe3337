//! Mapping of pipeline failures to HTTP responses.

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use pagecast_core::PipelineError;
use pagecast_shared::{ErrorClass, PagecastError};

const MISSING_URL: &str = "Missing URL query param";
const INVALID_URL: &str = "Invalid URL";
const INVALID_BODY: &str = "Invalid request body";
const UNPROCESSABLE: &str = "Unable to extract content";
const INTERNAL: &str = "Internal server error";

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

/// A failed request: status, a fixed caller-facing message, optional detail.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    detail: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bad_body(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: INVALID_BODY,
            detail: Some(detail.into()),
        }
    }

    /// The request deadline passed before the pipeline finished.
    pub fn timeout(limit: Duration) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: INTERNAL,
            detail: Some(format!(
                "request did not complete within {}ms",
                limit.as_millis()
            )),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match (&err.source, err.class()) {
            (PagecastError::MissingUrl, _) => Self {
                status: StatusCode::BAD_REQUEST,
                error: MISSING_URL,
                detail: None,
            },
            (_, ErrorClass::Input) => Self {
                status: StatusCode::BAD_REQUEST,
                error: INVALID_URL,
                detail: Some(err.source.to_string()),
            },
            (_, ErrorClass::Unprocessable) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                error: UNPROCESSABLE,
                detail: None,
            },
            (_, ErrorClass::Server) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: INTERNAL,
                detail: Some(err.source.to_string()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = self.status.as_u16(),
                detail = self.detail.as_deref().unwrap_or("-"),
                "request failed"
            );
        }
        let body = ErrorBody {
            error: self.error,
            detail: self.detail.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use pagecast_core::Stage;

    use super::*;

    fn failed(stage: Stage, source: PagecastError) -> ApiError {
        ApiError::from(PipelineError { stage, source })
    }

    #[test]
    fn input_errors_are_bad_requests() {
        let missing = failed(Stage::Received, PagecastError::MissingUrl);
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(missing.error, MISSING_URL);
        assert!(missing.detail.is_none());

        let invalid = failed(
            Stage::Received,
            PagecastError::invalid_url("nope", "relative URL without a base"),
        );
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert!(invalid.detail.unwrap().contains("nope"));
    }

    #[test]
    fn extraction_is_unprocessable() {
        let err = failed(Stage::Extracting, PagecastError::extraction("no readable text"));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error, UNPROCESSABLE);
    }

    #[test]
    fn timeout_detail_keeps_sub_second_deadlines() {
        let err = ApiError::timeout(Duration::from_millis(250));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.detail.as_deref(),
            Some("request did not complete within 250ms")
        );

        let err = ApiError::timeout(Duration::from_secs(300));
        assert_eq!(
            err.detail.as_deref(),
            Some("request did not complete within 300000ms")
        );
    }

    #[test]
    fn infrastructure_errors_carry_detail() {
        for source in [
            PagecastError::navigation("https://example.com", "timed out"),
            PagecastError::ArtifactBuild("font missing".into()),
            PagecastError::Upload("bucket not found".into()),
        ] {
            let detail = source.to_string();
            let err = failed(Stage::Storing, source);
            assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(err.detail.as_deref(), Some(detail.as_str()));
        }
    }
}
