//! API error types
//!
//! Every error turns into a response whose body is the reason string, with
//! the same string duplicated into an `X-Reason` header. Internal details
//! are logged but never shown to the client.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("IP not allowed")]
    Forbidden,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Range not satisfiable")]
    RangeNotSatisfiable,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Store(#[from] amber_store::StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "IP not allowed".to_string()),
            ApiError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
            }
            ApiError::RangeNotSatisfiable => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                "Range not satisfiable".to_string(),
            ),
            ApiError::Internal(detail) => {
                error!("internal error: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Unexpected error".to_string())
            }
            ApiError::Store(e) => {
                error!("storage error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Unexpected error".to_string())
            }
        };

        let mut response = (status, reason.clone()).into_response();
        let value = HeaderValue::from_str(&reason)
            .unwrap_or_else(|_| HeaderValue::from_static("error"));
        response.headers_mut().insert("X-Reason", value);
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
    }
}
