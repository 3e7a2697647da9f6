//! Pub/sub request dispatcher
//!
//! Entry point for every broker location. Validates the Origin, resolves
//! the channel id (possibly composite), then branches on method and
//! transport: websocket upgrades become websocket subscribers or publisher
//! connections, GETs pick the first matching subscriber transport
//! (eventsource > chunked > multipart > interval-poll > long-poll, with an
//! HTTP-publisher fallback), and POST/PUT/DELETE/OPTIONS go to the
//! publisher handler.

use std::collections::HashMap;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};

use super::AppState;
use super::publisher;
use super::subscriber::{self, chunked, eventsource, intervalpoll, longpoll, multipart, websocket};
use super::types::ApiError;
use crate::channel::id::{ChannelId, resolve_channel_id};
use crate::channel::msgid::MessageId;
use crate::core::constants::{LEGACY_CHANNEL_ID_PARAM, MULTITAG_MAX};

/// What a location is configured to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationRole {
    Publisher,
    Subscriber,
    PubSub,
}

impl LocationRole {
    fn allows_pub(self) -> bool {
        matches!(self, Self::Publisher | Self::PubSub)
    }

    fn allows_sub(self) -> bool {
        matches!(self, Self::Subscriber | Self::PubSub)
    }
}

/// Per-request scratch, mostly for logging and event emission
#[derive(Debug)]
pub struct RequestContext {
    /// Resolved bare channel ids, truncated for logging
    pub channel_ids: Vec<String>,
    pub channel_id_count: usize,
    pub origin: Option<String>,
    pub publisher_type: Option<&'static str>,
    pub prev_msg_id: Option<MessageId>,
    pub msg_id: Option<MessageId>,
    pub started: Instant,
}

impl RequestContext {
    fn new(origin: Option<String>) -> Self {
        Self {
            channel_ids: Vec::new(),
            channel_id_count: 0,
            origin,
            publisher_type: None,
            prev_msg_id: None,
            msg_id: None,
            started: Instant::now(),
        }
    }
}

/// `/pub` location: publisher role
pub async fn pub_location(State(state): State<AppState>, req: Request<Body>) -> Response {
    dispatch(state, LocationRole::Publisher, req).await
}

/// `/sub` location: subscriber role
pub async fn sub_location(State(state): State<AppState>, req: Request<Body>) -> Response {
    dispatch(state, LocationRole::Subscriber, req).await
}

/// `/pubsub` location: both roles
pub async fn pubsub_location(State(state): State<AppState>, req: Request<Body>) -> Response {
    dispatch(state, LocationRole::PubSub, req).await
}

async fn dispatch(state: AppState, role: LocationRole, req: Request<Body>) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    if let Some(o) = &origin {
        let allow = &state.config.cors.allow_origin;
        if allow != "*" && o != allow {
            return ApiError::OriginForbidden.into_response();
        }
    }
    let mut ctx = RequestContext::new(origin);
    let query = query_map(req.uri());

    if detect_websocket(req.headers()) {
        return dispatch_websocket(state, role, req, &mut ctx, &query).await;
    }

    let method = req.method().clone();
    let response = if method == Method::GET
        && role.allows_sub()
        && state.config.subscriber.any_enabled()
    {
        let sub_cfg = &state.config.subscriber;
        let headers = req.headers();
        let variant = if sub_cfg.eventsource && eventsource_detect(headers) {
            Some(Variant::Eventsource)
        } else if sub_cfg.chunked && chunked::detect(headers) {
            Some(Variant::Chunked)
        } else if sub_cfg.multipart && multipart::detect(headers) {
            Some(Variant::Multipart)
        } else if sub_cfg.intervalpoll {
            Some(Variant::Intervalpoll)
        } else if sub_cfg.longpoll {
            Some(Variant::Longpoll)
        } else {
            None
        };
        match variant {
            Some(variant) => {
                let channel = match resolve_channel(&state, &query, Role::Subscriber, &mut ctx) {
                    Ok(c) => c,
                    Err(e) => return e.into_response(),
                };
                let resume = subscriber::resume_point(
                    req.headers(),
                    &query,
                    &state.config.subscriber,
                    state.config.channels.start_at_oldest,
                );
                match variant {
                    Variant::Eventsource => eventsource::respond(&state, channel, resume).await,
                    Variant::Chunked => chunked::respond(&state, channel, resume).await,
                    Variant::Multipart => multipart::respond(&state, channel, resume).await,
                    Variant::Intervalpoll => intervalpoll::respond(&state, channel, resume).await,
                    Variant::Longpoll => longpoll::respond(&state, channel, resume).await,
                }
            }
            None if role.allows_pub() && state.config.publisher.http => {
                publisher::handle(&state, req, &mut ctx).await
            }
            None => ApiError::MethodForbidden.into_response(),
        }
    } else if (method == Method::GET
        || method == Method::POST
        || method == Method::PUT
        || method == Method::DELETE)
        && role.allows_pub()
        && state.config.publisher.http
    {
        publisher::handle(&state, req, &mut ctx).await
    } else if method == Method::OPTIONS {
        if role.allows_pub() && state.config.publisher.http {
            publisher_preflight(&state)
        } else if role.allows_sub() && state.config.subscriber.any_enabled() {
            subscriber_preflight(&state)
        } else {
            ApiError::MethodForbidden.into_response()
        }
    } else {
        ApiError::MethodForbidden.into_response()
    };

    tracing::debug!(
        channels = ?ctx.channel_ids,
        origin = ctx.origin.as_deref(),
        publisher = ctx.publisher_type,
        elapsed_ms = ctx.started.elapsed().as_millis() as u64,
        status = response.status().as_u16(),
        "pubsub request"
    );
    response
}

async fn dispatch_websocket(
    state: AppState,
    role: LocationRole,
    req: Request<Body>,
    ctx: &mut RequestContext,
    query: &HashMap<String, String>,
) -> Response {
    let (mut parts, _body) = req.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    if role.allows_sub() && state.config.subscriber.websocket {
        let channel = match resolve_channel(&state, query, Role::Subscriber, ctx) {
            Ok(c) => c,
            Err(e) => return e.into_response(),
        };
        let resume = subscriber::resume_point(
            &parts.headers,
            query,
            &state.config.subscriber,
            state.config.channels.start_at_oldest,
        );
        return websocket::subscribe_response(ws, state, channel, resume);
    }
    if role.allows_pub() && state.config.publisher.websocket {
        ctx.publisher_type = Some("websocket");
        let channel = match resolve_channel(&state, query, Role::Publisher, ctx) {
            Ok(c) => c,
            Err(e) => return e.into_response(),
        };
        return websocket::publish_response(ws, state, channel);
    }
    ApiError::MethodForbidden.into_response()
}

enum Variant {
    Eventsource,
    Chunked,
    Multipart,
    Intervalpoll,
    Longpoll,
}

/// Which id-template list to evaluate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    Publisher,
    Subscriber,
}

/// Evaluate the configured channel-id parameters (legacy single-variable
/// fallback included) into a resolved channel id.
pub(crate) fn resolve_channel(
    state: &AppState,
    query: &HashMap<String, String>,
    role: Role,
    ctx: &mut RequestContext,
) -> Result<ChannelId, ApiError> {
    let params = match role {
        Role::Publisher => &state.config.publisher.channel_id_params,
        Role::Subscriber => &state.config.subscriber.channel_id_params,
    };
    let mut values: Vec<String> = params
        .iter()
        .filter_map(|p| query.get(p))
        .filter(|v| !v.is_empty())
        .cloned()
        .collect();
    if values.is_empty() {
        match query.get(LEGACY_CHANNEL_ID_PARAM).filter(|v| !v.is_empty()) {
            Some(v) => values = vec![v.clone()],
            None => return Err(ApiError::NoChannelId),
        }
    }

    let channels = &state.config.channels;
    let id = resolve_channel_id(
        &values,
        &channels.group,
        channels.max_channel_id_length,
        channels.split_delimiter.as_deref(),
    )?;

    ctx.channel_id_count = id.components().len();
    ctx.channel_ids = id
        .components()
        .iter()
        .take(MULTITAG_MAX)
        .cloned()
        .collect();
    Ok(id)
}

pub(crate) fn query_map(uri: &Uri) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(q)| q)
        .unwrap_or_default()
}

fn detect_websocket(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
    upgrade && connection
}

fn eventsource_detect(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

fn preflight(allow_origin: &str, methods: &str, allowed_headers: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin.to_owned()),
            (header::ACCESS_CONTROL_ALLOW_METHODS, methods.to_owned()),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                allowed_headers.to_owned(),
            ),
        ],
    )
        .into_response()
}

pub(crate) fn publisher_preflight(state: &AppState) -> Response {
    preflight(
        &state.config.cors.allow_origin,
        "GET, POST, PUT, DELETE, OPTIONS",
        "Content-Type, Origin, Authorization",
    )
}

pub(crate) fn subscriber_preflight(state: &AppState) -> Response {
    preflight(
        &state.config.cors.allow_origin,
        "GET, OPTIONS",
        "If-None-Match, If-Modified-Since, Origin, Authorization",
    )
}
