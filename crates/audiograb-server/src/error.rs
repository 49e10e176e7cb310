//! HTTP error responses.
//!
//! Handlers return `Result<T, ServerError>`. Conversion failures are mapped to
//! a status code by [`ErrorKind`] and rendered as `{"error", "kind"}`; the
//! underlying tool output is logged, never sent to the caller.

use audiograb_core::{ConversionError, ErrorKind};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The request body could not be read as a conversion form
    #[error("{message}")]
    Request { status: StatusCode, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServerError::Request {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::SourceUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::SourceForbidden => StatusCode::FORBIDDEN,
        ErrorKind::SourceIsLiveStream | ErrorKind::SourceTooSmall | ErrorKind::NoAudioTrack => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ExtractionFailed | ErrorKind::Internal | ErrorKind::CleanupWarning => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ServerError::Conversion(e) => {
                let kind = e.kind();
                let status = status_for(kind);
                if status.is_server_error() {
                    error!(error = ?e, stage = %e.stage(), "conversion failed");
                } else {
                    warn!(error = %e, stage = %e.stage(), "conversion rejected");
                }
                (status, kind, e.user_message())
            }
            ServerError::Request { status, message } => {
                (*status, ErrorKind::InvalidRequest, message.clone())
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Internal,
                    "internal server error".to_owned(),
                )
            }
        };
        (
            status,
            Json(json!({ "error": message, "kind": kind.as_str() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidRequest), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::SourceUnavailable), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::SourceForbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(ErrorKind::SourceIsLiveStream),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(ErrorKind::NoAudioTrack), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status_for(ErrorKind::ExtractionFailed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(ErrorKind::Cancelled), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_conversion_error_response_status() {
        let response = ServerError::from(ConversionError::SourceIsLiveStream).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = ServerError::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
