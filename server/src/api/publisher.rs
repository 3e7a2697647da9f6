//! Publisher endpoint
//!
//! One request, one state machine: resolve the channel id, run the optional
//! authorization sub-request, then dispatch on method. GET answers channel
//! info, POST/PUT publish the body, DELETE destroys the channel, OPTIONS is
//! the CORS preflight.

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use super::AppState;
use super::pubsub::{self, RequestContext};
use super::types::ApiError;
use crate::channel::events::{BrokerEvent, EventContext};
use crate::channel::info::{ChannelInfo, negotiate};
use crate::channel::message::MessageDraft;
use crate::store::PublishStatus;

pub async fn handle(state: &AppState, req: Request<Body>, ctx: &mut RequestContext) -> Response {
    ctx.publisher_type = Some("http");
    let (parts, body) = req.into_parts();
    let query = pubsub::query_map(&parts.uri);

    let channel = match pubsub::resolve_channel(state, &query, pubsub::Role::Publisher, ctx) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };

    if let Some(url) = &state.config.publisher.authorize_url {
        match authorize(state, url, &parts.headers).await {
            Ok(true) => {}
            Ok(false) => return ApiError::AuthDenied.into_response(),
            Err(e) => return ApiError::Internal(e).into_response(),
        }
    }

    let accept = parts
        .headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let method = parts.method.clone();
    if method == Method::GET {
        match state.store.find_channel(&channel).await {
            Ok(Some(info)) => info_response(StatusCode::OK, accept.as_deref(), &info),
            Ok(None) => ApiError::ChannelNotFound.into_response(),
            Err(e) => ApiError::from(e).into_response(),
        }
    } else if method == Method::POST || method == Method::PUT {
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        // coalesce however many body buffers arrive into one
        let body = match axum::body::to_bytes(body, state.config.publisher.max_body_size).await {
            Ok(b) => b,
            Err(e) => return ApiError::BodyIo(e.to_string()).into_response(),
        };
        let draft = MessageDraft::new(content_type, body);
        match state
            .store
            .publish(&channel, draft, &state.config.channels.settings())
            .await
        {
            Ok(outcome) => {
                ctx.msg_id = Some(outcome.channel.last_msgid.clone());
                let event_ctx = EventContext {
                    channel_id: channel.to_string(),
                    msgid: ctx.msg_id.clone(),
                    prev_msgid: ctx.prev_msg_id.clone(),
                };
                state
                    .events
                    .emit(BrokerEvent::ChannelPublish, &event_ctx)
                    .await;
                let status = match outcome.status {
                    PublishStatus::Received => StatusCode::CREATED,
                    PublishStatus::Queued => StatusCode::ACCEPTED,
                };
                info_response(status, accept.as_deref(), &outcome.channel)
            }
            Err(e) => ApiError::from(e).into_response(),
        }
    } else if method == Method::DELETE {
        match state.store.delete_channel(&channel).await {
            Ok(Some(info)) => {
                let event_ctx = EventContext {
                    channel_id: channel.to_string(),
                    msgid: Some(info.last_msgid.clone()),
                    prev_msgid: None,
                };
                state
                    .events
                    .emit(BrokerEvent::ChannelDelete, &event_ctx)
                    .await;
                info_response(StatusCode::OK, accept.as_deref(), &info)
            }
            Ok(None) => ApiError::ChannelNotFound.into_response(),
            Err(e) => ApiError::from(e).into_response(),
        }
    } else {
        ApiError::MethodForbidden.into_response()
    }
}

/// Channel-info response body with content negotiation
pub fn info_response(status: StatusCode, accept: Option<&str>, info: &ChannelInfo) -> Response {
    let negotiated = negotiate(accept);
    let body = info.render(negotiated.format, Utc::now().timestamp());
    (
        status,
        [(header::CONTENT_TYPE, negotiated.content_type)],
        body,
    )
        .into_response()
}

/// Pre-publish authorization sub-request. 2xx authorizes; any other status
/// denies; transport failure is an internal error.
async fn authorize(state: &AppState, url: &str, headers: &HeaderMap) -> Result<bool, String> {
    let mut req = state.http_client.get(url);
    for name in [header::AUTHORIZATION, header::COOKIE, header::ORIGIN] {
        if let Some(value) = headers.get(&name) {
            req = req.header(name, value.clone());
        }
    }
    match req.send().await {
        Ok(resp) => Ok(resp.status().is_success()),
        Err(e) => Err(format!("authorization sub-request failed: {e}")),
    }
}
