//! Chunked-transfer subscriber: each message is one raw chunk
//!
//! Clients opt in with a `TE: chunked` request header.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::{NextOutcome, SubscriberSession};
use crate::api::AppState;
use crate::channel::id::ChannelId;
use crate::channel::msgid::MessageId;

/// Explicit client indication for the chunked transport
pub fn detect(headers: &HeaderMap) -> bool {
    headers
        .get(header::TE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
}

pub async fn respond(state: &AppState, channel: ChannelId, resume: MessageId) -> Response {
    let session = match SubscriberSession::start(
        &state.store,
        state.events.clone(),
        &channel,
        resume,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    let mut shutdown_rx = state.shutdown_rx.clone();
    let stream = async_stream::stream! {
        let mut session = session;
        loop {
            let outcome = tokio::select! {
                out = session.next_delivery(None) => out,
                _ = shutdown_rx.wait_for(|&v| v) => NextOutcome::Closed,
            };
            match outcome {
                NextOutcome::Message(msg) => {
                    yield Ok::<Bytes, Infallible>(msg.body.clone());
                }
                NextOutcome::Deleted => {
                    session.emit_status().await;
                    break;
                }
                NextOutcome::Closed | NextOutcome::TimedOut => break,
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
