use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Playlist exceeds maximum size of {max} tracks")]
    TooManyTracks { count: usize, max: usize },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Track {index} not found in job {job_id}")]
    TrackNotFound { job_id: String, index: usize },

    #[error("Analysis not complete for job {0}")]
    AnalysisIncomplete(String),

    #[error("Job {0} already has a run in progress")]
    JobBusy(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Catalog request failed: {0:#}")]
    Catalog(anyhow::Error),

    #[error("Internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl MigrateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::TooManyTracks { .. } => "PLAYLIST_TOO_LARGE",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::TrackNotFound { .. } => "TRACK_NOT_FOUND",
            Self::AnalysisIncomplete(_) => "ANALYSIS_INCOMPLETE",
            Self::JobBusy(_) => "JOB_BUSY",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Catalog(_) => "CATALOG_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::TooManyTracks { .. } => StatusCode::BAD_REQUEST,
            Self::JobNotFound(_) | Self::TrackNotFound { .. } => StatusCode::NOT_FOUND,
            Self::AnalysisIncomplete(_) | Self::JobBusy(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Catalog(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MigrateError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Self::TooManyTracks { count, max } = &self {
            error["maxSize"] = json!(max);
            error["trackCount"] = json!(count);
        }
        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_playlist_maps_to_bad_request() {
        let err = MigrateError::TooManyTracks { count: 600, max: 500 };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Playlist exceeds maximum size of 500 tracks");
    }

    #[test]
    fn catalog_failure_keeps_context_chain() {
        let inner = anyhow::anyhow!("quota exceeded").context("create playlist");
        let err = MigrateError::Catalog(inner);
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn internal_failure_maps_to_server_error() {
        let err = MigrateError::Internal(anyhow::anyhow!("task panicked"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
