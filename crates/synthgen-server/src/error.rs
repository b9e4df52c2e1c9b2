//! HTTP-facing error type.

use axum::{
    Json,
    extract::rejection::BytesRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use synthgen_core::{CatalogError, ExporterError, RequestError};

use crate::job::{JobInProgress, SpawnError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Exporter(#[from] ExporterError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    JobInProgress(#[from] JobInProgress),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error(transparent)]
    BodyRejected(#[from] BytesRejection),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Request(_) | Self::MalformedBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::JobInProgress(_) => StatusCode::CONFLICT,
            Self::BodyRejected(rejection) => rejection.status(),
            Self::Catalog(CatalogError::PathTraversalRejected(_)) => StatusCode::BAD_REQUEST,
            Self::Catalog(err) if err.is_client_error() => StatusCode::NOT_FOUND,
            Self::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Exporter(_) | Self::Spawn(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to clients. Server-side failures are reported
    /// generically; the details go to the log.
    fn public_message(&self) -> String {
        match self {
            Self::Exporter(_) => "Failed to write generator configuration".into(),
            Self::Catalog(CatalogError::Io(_)) => "Failed to read output directory".into(),
            Self::Catalog(CatalogError::Archive(_)) => "Failed to build archive".into(),
            Self::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = json!({
            "status": "error",
            "message": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}
