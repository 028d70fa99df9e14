use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use boxsync_core::protocol::ErrorResponse;
use boxsync_storage::StorageError;

/// A handler-level failure with a fixed status and message.
#[derive(Debug)]
pub(crate) struct HttpFailure {
    pub status: StatusCode,
    pub message: String,
}

impl HttpFailure {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub(crate) fn into_response(self) -> Response {
        error_response(self.status, &self.message)
    }
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    let error = match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::CONFLICT => "conflict",
        StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
        _ => "internal_error",
    };
    (
        status,
        Json(ErrorResponse::new(error).with_message(message)),
    )
        .into_response()
}

/// Error mapping of the storage layer onto wire statuses.
pub(crate) fn storage_error(error: StorageError) -> Response {
    match error {
        StorageError::NotFound(what) => {
            error_response(StatusCode::NOT_FOUND, &format!("{what} not found"))
        }
        StorageError::BadRequest(message) => error_response(StatusCode::BAD_REQUEST, &message),
        StorageError::Conflict(rejection) => {
            (StatusCode::CONFLICT, Json(*rejection)).into_response()
        }
        StorageError::PayloadTooLarge { limit_mb } => error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("payload exceeds {limit_mb} MB limit"),
        ),
        StorageError::Corrupt(message) => {
            tracing::error!(%message, "chunk assembly failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &message)
        }
        other @ (StorageError::VersionExists { .. }
        | StorageError::Io(_)
        | StorageError::Serde(_)) => {
            tracing::error!(error = %other, "storage operation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
