//! Server-Sent Events subscriber

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use tokio::time::Duration;

use super::{NextOutcome, SubscriberSession};
use crate::api::AppState;
use crate::channel::id::ChannelId;
use crate::channel::msgid::MessageId;
use crate::core::constants::SSE_KEEPALIVE_SECS;

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

    let shutdown_rx = state.shutdown_rx.clone();
    Sse::new(event_stream(session, shutdown_rx))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
                .text(""),
        )
        .into_response()
}

fn event_stream(
    mut session: SubscriberSession,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        loop {
            let outcome = tokio::select! {
                out = session.next_delivery(None) => out,
                _ = shutdown_rx.wait_for(|&v| v) => NextOutcome::Closed,
            };
            match outcome {
                NextOutcome::Message(msg) => {
                    // the SSE framing cannot carry carriage returns; split
                    // them into data lines like any other line break
                    let data = String::from_utf8_lossy(&msg.body)
                        .replace("\r\n", "\n")
                        .replace('\r', "\n");
                    yield Ok(Event::default().id(msg.id.to_string()).data(data));
                }
                NextOutcome::Deleted => {
                    session.emit_status().await;
                    yield Ok(Event::default().event("channel_deleted").data(""));
                    break;
                }
                NextOutcome::Closed | NextOutcome::TimedOut => break,
            }
        }
    }
}
