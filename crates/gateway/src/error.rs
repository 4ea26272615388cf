use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use protocol::{InvalidParameter, TranscodeError};

use crate::relay::RelayError;

/// Everything a handler can fail with before the response starts
/// streaming. Failures after the first body byte cannot change the
/// status any more; those only terminate the stream.
#[derive(Debug, Error)]
pub(crate) enum ApiError {
    #[error(transparent)]
    InvalidParameter(#[from] InvalidParameter),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

impl ApiError {
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            ApiError::Relay(RelayError::ConnectFailed(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Relay(RelayError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Transcode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(status = %status, error = %self, "request failed");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
