//! Interval-poll subscriber: one message from history or an immediate 304

use axum::response::{IntoResponse, Response};
use tokio::time::Duration;

use super::{SubscriberSession, longpoll};
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

    // history replay is ready on the first poll; a zero wait means "only
    // what is already buffered"
    let outcome = session.next_delivery(Some(Duration::ZERO)).await;
    longpoll::finish(state, session, outcome).await
}
