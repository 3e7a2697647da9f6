//! Subscriber endpoints
//!
//! Each transport variant frames the same logical delivery stream:
//! a [`SubscriberSession`] owns the storage subscription, the resume
//! cursor, miss detection and meta event emission; the variant modules
//! only serialize messages onto the wire.
//!
//! - `longpoll` - one message per request, hanging GET
//! - `intervalpoll` - one message per request, immediate 304 when none
//! - `eventsource` - Server-Sent Events
//! - `chunked` - raw chunked transfer
//! - `multipart` - multipart/mixed framing
//! - `websocket` - websocket subscriber and publisher connections

pub mod chunked;
pub mod eventsource;
pub mod intervalpoll;
pub mod longpoll;
pub mod multipart;
pub mod websocket;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderMap, header};
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use tokio::time::{Duration, timeout};

use crate::api::types::ApiError;
use crate::channel::events::{BrokerEvent, EventBroadcaster, EventContext};
use crate::channel::id::ChannelId;
use crate::channel::message::Message;
use crate::channel::miss;
use crate::channel::msgid::MessageId;
use crate::core::config::{ResumeSource, SubscriberConfig};
use crate::store::{ChannelStore, ChannelSubscription, Delivery};

/// Select the resume point for a subscriber request.
///
/// 1. Unless `msg_in_etag_only`, `If-Modified-Since` gives the time and
///    `If-None-Match` the tags.
/// 2. With `msg_in_etag_only`, a compound `If-None-Match` is used verbatim.
/// 3. Otherwise the configured sources are evaluated in order; the first
///    value parsing as a compound id wins.
/// 4. Default: oldest or newest per configuration.
pub fn resume_point(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    cfg: &SubscriberConfig,
    start_at_oldest: bool,
) -> MessageId {
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());

    let mut try_sources = true;
    if !cfg.msg_in_etag_only {
        if let Some(ims) = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
        {
            let time = parse_http_date(ims).unwrap_or(-1);
            return match if_none_match {
                Some(etag) => MessageId::parse(&format!("{time}:{etag}"))
                    .unwrap_or_else(|_| MessageId::single(time, 0)),
                None => MessageId::single(time, 0),
            };
        }
    } else if let Some(etag) = if_none_match {
        if let Ok(id) = MessageId::parse(etag) {
            return id;
        }
        try_sources = false;
    }

    if try_sources {
        for source in &cfg.last_msgid_sources {
            let value = match source {
                ResumeSource::Header(name) => headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned),
                ResumeSource::Query(name) => query.get(name).cloned(),
            };
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                if let Ok(id) = MessageId::parse(&v) {
                    return id;
                }
            }
        }
    }

    if start_at_oldest {
        MessageId::zero()
    } else {
        MessageId::newest()
    }
}

/// Parse an HTTP date header into a unix second
pub fn parse_http_date(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(s).ok().map(|d| d.timestamp())
}

/// Format a unix second as an HTTP date
pub fn format_http_date(t: i64) -> String {
    match Utc.timestamp_opt(t.max(0), 0).single() {
        Some(dt) => dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        None => String::new(),
    }
}

/// `Last-Modified` and `Etag` values for a delivered message
pub fn delivery_headers(msg: &Message, msg_in_etag_only: bool) -> (String, String) {
    let etag = if msg_in_etag_only {
        msg.id.to_string()
    } else {
        msg.id.tag_string()
    };
    (format_http_date(msg.id.time), etag)
}

/// `Last-Modified` and `Etag` for an empty (304) reply, from the cursor
pub fn cursor_headers(cursor: &MessageId, msg_in_etag_only: bool) -> (String, String) {
    let etag = if msg_in_etag_only {
        cursor.to_string()
    } else {
        cursor.tag_string()
    };
    (format_http_date(cursor.time), etag)
}

/// What the session hands a transport next
pub enum NextOutcome {
    Message(Arc<Message>),
    /// The channel was deleted
    Deleted,
    /// The subscription stream ended
    Closed,
    /// The wait elapsed without a delivery
    TimedOut,
}

/// One subscriber's delivery stream plus its protocol state
pub struct SubscriberSession {
    sub: ChannelSubscription,
    cursor: MessageId,
    events: EventBroadcaster,
    ctx: EventContext,
    _dequeue: DequeueGuard,
}

impl SubscriberSession {
    /// Bind to storage and announce the enqueue
    pub async fn start(
        store: &ChannelStore,
        events: EventBroadcaster,
        channel: &ChannelId,
        resume: MessageId,
    ) -> Result<Self, ApiError> {
        let sub = store.subscribe(channel, resume.clone()).await?;
        let ctx = EventContext {
            channel_id: channel.to_string(),
            msgid: Some(resume.clone()),
            prev_msgid: None,
        };
        events.emit(BrokerEvent::SubscriberEnqueue, &ctx).await;
        let dequeue = DequeueGuard {
            events: events.clone(),
            ctx: ctx.clone(),
        };
        Ok(Self {
            sub,
            cursor: resume,
            events,
            ctx,
            _dequeue: dequeue,
        })
    }

    pub fn cursor(&self) -> &MessageId {
        &self.cursor
    }

    /// Next delivery. `wait` bounds only the stream wait; miss detection,
    /// cursor update and event emission run after a message arrives.
    pub async fn next_delivery(&mut self, wait: Option<Duration>) -> NextOutcome {
        loop {
            let item = match wait {
                None => self.sub.receiver.next().await,
                Some(d) => match timeout(d, self.sub.receiver.next()).await {
                    Ok(item) => item,
                    Err(_) => return NextOutcome::TimedOut,
                },
            };
            match item {
                None => return NextOutcome::Closed,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "subscription stream error");
                }
                Some(Ok(Delivery::Deleted)) => return NextOutcome::Deleted,
                Some(Ok(Delivery::Message(msg))) => {
                    let now = Utc::now().timestamp();
                    miss::check_delivery(&self.cursor, &msg, now);
                    self.cursor.update(&msg.id);
                    self.ctx.prev_msgid = Some(msg.prev_id.clone());
                    self.ctx.msgid = Some(msg.id.clone());
                    self.events
                        .emit(BrokerEvent::SubscriberReceiveMessage, &self.ctx)
                        .await;
                    return NextOutcome::Message(msg);
                }
            }
        }
    }

    /// Announce a status reply (304, 410) to the event channel
    pub async fn emit_status(&mut self) {
        self.events
            .emit(BrokerEvent::SubscriberReceiveStatus, &self.ctx)
            .await;
    }
}

/// Emits `subscriber_dequeue` exactly once, when the session drops
struct DequeueGuard {
    events: EventBroadcaster,
    ctx: EventContext,
}

impl Drop for DequeueGuard {
    fn drop(&mut self) {
        if !self.events.enabled() {
            return;
        }
        let events = self.events.clone();
        let ctx = std::mem::take(&mut self.ctx);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                events.emit(BrokerEvent::SubscriberDequeue, &ctx).await;
            });
        }
    }
}
