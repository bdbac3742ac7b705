//! API error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::worker::{ErrorKind, WorkerError};

/// Message used for 500 responses when error details are hidden.
const GENERIC_ERROR: &str = "Internal server error";

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

/// API error type that converts to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// 400 Bad Request with the provided message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// 500 Internal Server Error with the provided message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Map a rejected submission to a response.
    ///
    /// Every worker-side failure is a 500; `expose` controls whether the
    /// worker's message reaches the client.
    pub fn from_worker(error: &WorkerError, expose: bool) -> Self {
        if error.kind() == ErrorKind::Validation {
            return Self::bad_request(error.to_string());
        }
        if expose {
            Self::internal(error.to_string())
        } else {
            Self::internal(GENERIC_ERROR)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
