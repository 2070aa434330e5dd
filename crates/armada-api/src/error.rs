// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error mapping.
//!
//! Malformed input maps to 400, missing records to 404, version conflicts
//! to 409, anything else to 500. Bodies are a flat `{"error": "..."}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use armada_core::CoreError;

/// API-facing error with an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),
    /// 404
    NotFound(String),
    /// 409
    Conflict(String),
    /// 500
    Internal(String),
}

impl ApiError {
    /// Build a 400 from anything printable.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedInput(_) => ApiError::BadRequest(err.to_string()),
            CoreError::RecordNotFound(_) => ApiError::NotFound(err.to_string()),
            CoreError::Conflict(_) => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
