//! Shared API types
//!
//! The broker's error taxonomy and its mapping onto HTTP statuses.
//! Responses carry bare statuses; only the missing-channel-id case gets an
//! explanatory body, which is what protocol clients expect.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::channel::id::IdRejection;
use crate::store::StoreError;

/// Request-level failures, surfaced to logs and as HTTP statuses
#[derive(Debug)]
pub enum ApiError {
    /// Channel id failed validation
    BadChannelId,
    /// No channel id variable present on the request
    NoChannelId,
    /// CORS origin mismatch
    OriginForbidden,
    /// Method not enabled for this location
    MethodForbidden,
    /// Authorization sub-request answered non-2xx
    AuthDenied,
    /// Channel does not exist
    ChannelNotFound,
    /// Storage engine failure
    Storage(StoreError),
    /// Request body could not be read
    BodyIo(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadChannelId | Self::OriginForbidden | Self::MethodForbidden | Self::AuthDenied => {
                StatusCode::FORBIDDEN
            }
            Self::NoChannelId | Self::ChannelNotFound => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::BodyIo(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Storage(e) => tracing::error!(error = %e, "storage error"),
            Self::BodyIo(e) => tracing::error!(error = %e, "request body error"),
            Self::Internal(e) => tracing::error!(error = %e, "internal error"),
            Self::BadChannelId => tracing::warn!("channel id rejected"),
            _ => {}
        }
        match self {
            Self::NoChannelId => (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "text/plain")],
                "No channel id provided.",
            )
                .into_response(),
            other => other.status().into_response(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e)
    }
}

impl From<IdRejection> for ApiError {
    fn from(_: IdRejection) -> Self {
        Self::BadChannelId
    }
}
