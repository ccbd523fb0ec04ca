use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::deploy::DeployError;
use crate::providers::ProviderError;
use crate::tracker::TrackError;

/// Error type for HTTP handlers. Rendered as `{ "success": false, "error": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Track(#[from] TrackError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::Provider(e) => ApiError::Provider(e),
            DeployError::Track(e) => ApiError::Track(e),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Provider(ProviderError::InvalidRepoUrl(_)) => StatusCode::BAD_REQUEST,
            ApiError::Provider(ProviderError::NoDeployableBranch(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            // Upstream client errors (bad token, missing repo) keep their status.
            ApiError::Provider(ProviderError::Status { status, .. })
                if (400..500).contains(status) =>
            {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Track(TrackError::AlreadyTracked { .. }) => StatusCode::CONFLICT,
            ApiError::Track(TrackError::Cancelled { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Track(
                TrackError::Fetch { .. } | TrackError::EmptyJobId | TrackError::InvalidConfig(_),
            ) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        let body = json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
