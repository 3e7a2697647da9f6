//! WebSocket transports
//!
//! A websocket upgrade is either a subscriber (messages stream out as
//! frames) or a long-lived publisher connection (each incoming frame is
//! published, acknowledged with the new message id).

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;

use super::{NextOutcome, SubscriberSession};
use crate::api::AppState;
use crate::channel::events::{BrokerEvent, EventContext};
use crate::channel::id::ChannelId;
use crate::channel::message::MessageDraft;
use crate::channel::msgid::MessageId;

pub fn subscribe_response(
    ws: WebSocketUpgrade,
    state: AppState,
    channel: ChannelId,
    resume: MessageId,
) -> Response {
    ws.on_upgrade(move |socket| subscriber_socket(socket, state, channel, resume))
}

pub fn publish_response(ws: WebSocketUpgrade, state: AppState, channel: ChannelId) -> Response {
    ws.on_upgrade(move |socket| publisher_socket(socket, state, channel))
}

async fn subscriber_socket(
    mut socket: WebSocket,
    state: AppState,
    channel: ChannelId,
    resume: MessageId,
) {
    let mut session = match SubscriberSession::start(
        &state.store,
        state.events.clone(),
        &channel,
        resume,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = ?e, "websocket subscribe failed");
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: 1011,
                    reason: "subscribe failed".into(),
                })))
                .await;
            return;
        }
    };

    let mut shutdown_rx = state.shutdown_rx.clone();
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                let shutting_down = changed.is_err() || *shutdown_rx.borrow();
                if !shutting_down {
                    continue;
                }
                let _ = socket.send(WsMessage::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "shutting down".into(),
                }))).await;
                break;
            }
            incoming = socket.recv() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                    // inbound frames on a subscriber socket are ignored
                    Some(Ok(_)) => {}
                }
            }
            outcome = session.next_delivery(None) => {
                match outcome {
                    NextOutcome::Message(msg) => {
                        let frame = match std::str::from_utf8(&msg.body) {
                            Ok(text) => WsMessage::Text(text.to_owned().into()),
                            Err(_) => WsMessage::Binary(msg.body.clone()),
                        };
                        if socket.send(frame).await.is_err() {
                            break;
                        }
                    }
                    NextOutcome::Deleted => {
                        session.emit_status().await;
                        let _ = socket.send(WsMessage::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "410 Channel Deleted".into(),
                        }))).await;
                        break;
                    }
                    NextOutcome::Closed | NextOutcome::TimedOut => break,
                }
            }
        }
    }
}

async fn publisher_socket(mut socket: WebSocket, state: AppState, channel: ChannelId) {
    let settings = state.config.channels.settings();
    let mut shutdown_rx = state.shutdown_rx.clone();
    loop {
        let incoming = tokio::select! {
            _ = shutdown_rx.wait_for(|&v| v) => break,
            incoming = socket.recv() => incoming,
        };
        let draft = match incoming {
            None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
            Some(Ok(WsMessage::Text(text))) => MessageDraft::new(
                Some("text/plain".to_owned()),
                Bytes::from(text.as_bytes().to_vec()),
            ),
            Some(Ok(WsMessage::Binary(body))) => {
                MessageDraft::new(Some("application/octet-stream".to_owned()), body)
            }
            Some(Ok(_)) => continue,
        };

        match state.store.publish(&channel, draft, &settings).await {
            Ok(outcome) => {
                let ctx = EventContext {
                    channel_id: channel.to_string(),
                    msgid: Some(outcome.channel.last_msgid.clone()),
                    prev_msgid: None,
                };
                state.events.emit(BrokerEvent::ChannelPublish, &ctx).await;
                let ack = outcome.channel.last_msgid.to_string();
                if socket.send(WsMessage::Text(ack.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "websocket publish failed");
                let _ = socket
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: 1011,
                        reason: "publish failed".into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
