//! HTTP mapping of orchestration errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};
use vizreg_runner::RunError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error("{0}")]
    NotFound(String),
}

impl From<vizreg_common::Error> for ApiError {
    fn from(e: vizreg_common::Error) -> Self {
        ApiError::Run(RunError::Config(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Run(e) => match e {
                RunError::Config(vizreg_common::Error::SuiteNotFound(_)) => StatusCode::NOT_FOUND,
                RunError::IndexOutOfRange { .. } | RunError::ArtifactMissing(_) => {
                    StatusCode::NOT_FOUND
                }
                RunError::AlreadyRunning(_)
                | RunError::NotAssessing
                | RunError::NotCurrent { .. }
                | RunError::AlreadyDecided(_) => StatusCode::CONFLICT,
                e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", status, self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
