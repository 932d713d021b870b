// src/api/errors.rs

//! HTTP error mapping for API handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::errors::LabqueueError;
use crate::protocol::FieldError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
}

/// Error returned by every handler: a status code plus the `{ ok: false }`
/// envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    fields: Option<Vec<FieldError>>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fields: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LabqueueError> for ApiError {
    fn from(err: LabqueueError) -> Self {
        let message = err.to_string();
        match err {
            LabqueueError::ProtocolNotFound(_)
            | LabqueueError::RunNotFound(_)
            | LabqueueError::CommandNotFound(_) => Self::not_found(message),
            LabqueueError::ProtocolParamsInvalid(errors) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
                fields: Some(errors.errors),
            },
            LabqueueError::CommandNotSkippable { .. } => Self::new(StatusCode::CONFLICT, message),
            other => {
                error!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            ok: false,
            error: self.message,
            fields: self.fields,
        };
        (self.status, Json(body)).into_response()
    }
}
