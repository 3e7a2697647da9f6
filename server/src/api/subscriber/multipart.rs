//! multipart/mixed subscriber: each message is one part

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::{NextOutcome, SubscriberSession};
use crate::api::AppState;
use crate::channel::id::ChannelId;
use crate::channel::message::Message;
use crate::channel::msgid::MessageId;
use crate::core::constants::MULTIPART_BOUNDARY;

/// Negotiated on `Accept: multipart/mixed`
pub fn detect(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("multipart/mixed"))
}

fn frame(msg: &Message) -> Bytes {
    let mut part = Vec::with_capacity(msg.body.len() + 128);
    part.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    if let Some(ct) = &msg.content_type {
        part.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
    }
    part.extend_from_slice(b"\r\n");
    part.extend_from_slice(&msg.body);
    Bytes::from(part)
}

fn closing_frame() -> Bytes {
    Bytes::from(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n"))
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
                    yield Ok::<Bytes, Infallible>(frame(&msg));
                }
                NextOutcome::Deleted => {
                    session.emit_status().await;
                    yield Ok(closing_frame());
                    break;
                }
                NextOutcome::Closed | NextOutcome::TimedOut => {
                    yield Ok(closing_frame());
                    break;
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/mixed; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
