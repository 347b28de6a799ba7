use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by the dispense, upload and listing paths.
///
/// None of these are retried and none stop the service.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Dataset directory unavailable: {0}")]
    CatalogUnavailable(#[source] std::io::Error),

    #[error("No datasets available.")]
    NoShardsAvailable,

    #[error("Failed to send dataset {shard}: {source}")]
    ShardUnreadable {
        shard: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No file uploaded.")]
    NoFilePayload,

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Upload interrupted: {0}")]
    PayloadInterrupted(String),

    #[error("Failed to store model: {0}")]
    WriteFailure(#[source] std::io::Error),

    #[error("Cannot read models folder: {0}")]
    StoreUnavailable(#[source] std::io::Error),
}

impl CoordinatorError {
    pub fn status(&self) -> StatusCode {
        match self {
            CoordinatorError::NoFilePayload
            | CoordinatorError::MalformedUpload(_)
            | CoordinatorError::PayloadInterrupted(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
