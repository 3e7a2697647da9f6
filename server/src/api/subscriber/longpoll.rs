//! Longpoll subscriber: the request hangs until one message arrives

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::time::Duration;

use super::{NextOutcome, SubscriberSession, cursor_headers, delivery_headers};
use crate::api::AppState;
use crate::channel::id::ChannelId;
use crate::channel::msgid::MessageId;

pub async fn respond(state: &AppState, channel: ChannelId, resume: MessageId) -> Response {
    let mut session = match SubscriberSession::start(
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

    let wait = match state.config.subscriber.timeout {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let mut shutdown_rx = state.shutdown_rx.clone();
    let outcome = tokio::select! {
        out = session.next_delivery(wait) => out,
        _ = shutdown_rx.wait_for(|&v| v) => NextOutcome::Closed,
    };

    finish(state, session, outcome).await
}

/// Shared single-shot completion (longpoll and intervalpoll)
pub(super) async fn finish(
    state: &AppState,
    mut session: SubscriberSession,
    outcome: NextOutcome,
) -> Response {
    let etag_only = state.config.subscriber.msg_in_etag_only;
    match outcome {
        NextOutcome::Message(msg) => {
            let (last_modified, etag) = delivery_headers(&msg, etag_only);
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::LAST_MODIFIED, last_modified)
                .header(header::ETAG, etag);
            if let Some(ct) = &msg.content_type {
                builder = builder.header(header::CONTENT_TYPE, ct.as_str());
            }
            builder
                .body(axum::body::Body::from(msg.body.clone()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        NextOutcome::Deleted => {
            session.emit_status().await;
            StatusCode::GONE.into_response()
        }
        NextOutcome::TimedOut | NextOutcome::Closed => {
            session.emit_status().await;
            let (last_modified, etag) = cursor_headers(session.cursor(), etag_only);
            (
                StatusCode::NOT_MODIFIED,
                [(header::LAST_MODIFIED, last_modified), (header::ETAG, etag)],
            )
                .into_response()
        }
    }
}
