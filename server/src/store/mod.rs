//! Storage engines
//!
//! The broker core depends on exactly four storage capabilities: publish,
//! find, delete and subscribe. Engines implement them for *single* channels
//! behind [`StorageEngine`]; [`ChannelStore`] wraps an engine and owns the
//! composite-channel semantics (demultiplexing publishes to component
//! channels and merging their streams back into one subscriber stream with
//! expanded tag vectors).

pub(crate) mod bridge;
pub mod memory;
pub mod redis;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;

use crate::channel::id::ChannelId;
use crate::channel::info::ChannelInfo;
use crate::channel::message::{Message, MessageDraft};
use crate::channel::msgid::MessageId;
use crate::core::constants::{
    DEFAULT_BUFFER_TIMEOUT_SECS, DEFAULT_CHANNEL_TIMEOUT_SECS, DEFAULT_MAX_MESSAGES,
    META_BUFFER_TIMEOUT_SECS, META_CHANNEL_TIMEOUT_SECS,
};

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend connection failure
    #[error("connection error: {0}")]
    Connection(String),
    /// Wire encoding/decoding failure
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Subscriber fell behind the fan-out buffer
    #[error("subscriber lagged by {0} messages")]
    Lagged(u64),
    /// Anything else the engine cannot express
    #[error("storage operation failed: {0}")]
    Internal(String),
}

/// Publish result status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishStatus {
    /// Stored, no subscriber was notified
    Queued,
    /// Stored and sent to at least one subscriber
    Received,
}

/// Publish result: status plus the channel post-state
#[derive(Clone, Debug)]
pub struct PublishOutcome {
    pub status: PublishStatus,
    pub channel: ChannelInfo,
}

/// Per-channel retention policy, supplied with each publish
#[derive(Clone, Debug)]
pub struct ChannelSettings {
    /// History bound by count
    pub max_messages: usize,
    /// Message lifetime in seconds
    pub buffer_timeout: i64,
    /// Idle lifetime of the channel itself in seconds
    pub channel_timeout: i64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            buffer_timeout: DEFAULT_BUFFER_TIMEOUT_SECS,
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT_SECS,
        }
    }
}

impl ChannelSettings {
    /// Fixed small retention for meta event channels
    pub fn meta_events() -> Self {
        Self {
            max_messages: u32::MAX as usize,
            buffer_timeout: META_BUFFER_TIMEOUT_SECS,
            channel_timeout: META_CHANNEL_TIMEOUT_SECS,
        }
    }
}

/// One item on a subscription stream
#[derive(Clone, Debug)]
pub enum Delivery {
    Message(Arc<Message>),
    /// The channel was deleted; the stream ends after this
    Deleted,
}

/// A live subscription to one (possibly composite) channel
pub struct ChannelSubscription {
    pub receiver: Pin<Box<dyn Stream<Item = Result<Delivery, StoreError>> + Send>>,
}

/// Storage engine contract for single channels
///
/// Implementations also own history retention (`max_messages`,
/// `buffer_timeout`) and channel lifetime (`channel_timeout`).
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Store a message, assign its id, notify subscribers
    async fn publish(
        &self,
        channel: &str,
        draft: MessageDraft,
        settings: &ChannelSettings,
    ) -> Result<PublishOutcome, StoreError>;

    /// Channel stats, or `None` when the channel does not exist
    async fn find_channel(&self, channel: &str) -> Result<Option<ChannelInfo>, StoreError>;

    /// Remove the channel and its history; returns pre-deletion stats
    async fn delete_channel(&self, channel: &str) -> Result<Option<ChannelInfo>, StoreError>;

    /// Register a subscriber: replay applicable history starting after
    /// `resume`, then deliver each subsequent publish
    async fn subscribe(
        &self,
        channel: &str,
        resume: MessageId,
    ) -> Result<ChannelSubscription, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;

    fn engine_name(&self) -> &'static str;
}

/// Engine wrapper owning composite-channel semantics
#[derive(Clone)]
pub struct ChannelStore {
    engine: Arc<dyn StorageEngine>,
}

impl ChannelStore {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.engine_name()
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.engine.health_check().await
    }

    /// Publish to a channel; composite ids fan the message out to every
    /// component channel in order.
    pub async fn publish(
        &self,
        id: &ChannelId,
        draft: MessageDraft,
        settings: &ChannelSettings,
    ) -> Result<PublishOutcome, StoreError> {
        match id {
            ChannelId::Single(ch) => self.engine.publish(ch, draft, settings).await,
            ChannelId::Multi(chs) => {
                let mut outcomes = Vec::with_capacity(chs.len());
                for ch in chs {
                    outcomes.push(self.engine.publish(ch, draft.clone(), settings).await?);
                }
                let status = if outcomes
                    .iter()
                    .any(|o| o.status == PublishStatus::Received)
                {
                    PublishStatus::Received
                } else {
                    PublishStatus::Queued
                };
                let channel =
                    aggregate_infos(outcomes.iter().map(|o| Some(o.channel.clone())).collect());
                Ok(PublishOutcome {
                    status,
                    channel: channel.unwrap_or_else(ChannelInfo::empty),
                })
            }
        }
    }

    /// Channel stats; composite stats aggregate the components
    pub async fn find_channel(&self, id: &ChannelId) -> Result<Option<ChannelInfo>, StoreError> {
        match id {
            ChannelId::Single(ch) => self.engine.find_channel(ch).await,
            ChannelId::Multi(chs) => {
                let mut infos = Vec::with_capacity(chs.len());
                for ch in chs {
                    infos.push(self.engine.find_channel(ch).await?);
                }
                Ok(aggregate_infos(infos))
            }
        }
    }

    /// Delete the channel(s); composite deletes every component
    pub async fn delete_channel(&self, id: &ChannelId) -> Result<Option<ChannelInfo>, StoreError> {
        match id {
            ChannelId::Single(ch) => self.engine.delete_channel(ch).await,
            ChannelId::Multi(chs) => {
                let mut infos = Vec::with_capacity(chs.len());
                for ch in chs {
                    infos.push(self.engine.delete_channel(ch).await?);
                }
                Ok(aggregate_infos(infos))
            }
        }
    }

    /// Subscribe; composite subscriptions merge the component streams and
    /// expand every message id into the composite tag space.
    pub async fn subscribe(
        &self,
        id: &ChannelId,
        resume: MessageId,
    ) -> Result<ChannelSubscription, StoreError> {
        match id {
            ChannelId::Single(ch) => {
                let resume = MessageId::single(resume.time, resume.tags()[0]);
                self.engine.subscribe(ch, resume).await
            }
            ChannelId::Multi(chs) => {
                let n = chs.len();
                let mut streams = Vec::with_capacity(n);
                for (i, ch) in chs.iter().enumerate() {
                    let sub = self
                        .engine
                        .subscribe(ch, component_resume(&resume, i, n))
                        .await?;
                    streams.push(
                        sub.receiver
                            .map(move |item| item.map(|d| expand_delivery(d, i, n)))
                            .boxed(),
                    );
                }
                Ok(ChannelSubscription {
                    receiver: Box::pin(stream::select_all(streams)),
                })
            }
        }
    }
}

/// Resume point for component `i` of an `n`-channel composite
fn component_resume(resume: &MessageId, i: usize, n: usize) -> MessageId {
    if resume.tagcount() == n {
        MessageId::single(resume.time, resume.tags()[i])
    } else if resume.time <= 0 {
        // oldest/newest apply uniformly
        MessageId::single(resume.time, 0)
    } else {
        // a concrete time with a mismatched tag vector: deliver everything
        // in that second
        MessageId::single(resume.time, -1)
    }
}

/// Rewrite a component delivery into composite tag space: position `i`
/// carries the component tag, every other position is `-1`.
fn expand_delivery(delivery: Delivery, i: usize, n: usize) -> Delivery {
    match delivery {
        Delivery::Message(m) => Delivery::Message(Arc::new(Message {
            id: m.id.expand_multi(0, i, n, -1),
            prev_id: m.prev_id.expand_multi(0, i, n, -1),
            content_type: m.content_type.clone(),
            body: m.body.clone(),
            expires: m.expires,
        })),
        Delivery::Deleted => Delivery::Deleted,
    }
}

/// Aggregate component infos: counts sum, the merged last id carries each
/// component's tag at its position when it published in the newest second,
/// `-1` otherwise.
fn aggregate_infos(infos: Vec<Option<ChannelInfo>>) -> Option<ChannelInfo> {
    if infos.iter().all(Option::is_none) {
        return None;
    }
    let n = infos.len();
    let mut messages = 0u64;
    let mut subscribers = 0u64;
    let mut last_seen = 0i64;
    let max_time = infos
        .iter()
        .flatten()
        .map(|i| i.last_msgid.time)
        .max()
        .unwrap_or(0);
    let mut tags = vec![-1i16; n.max(1)];
    let mut tagactive = 0u8;
    for (i, info) in infos.iter().enumerate() {
        let Some(info) = info else { continue };
        messages += info.messages;
        subscribers += info.subscribers;
        last_seen = last_seen.max(info.last_seen);
        if info.last_msgid.time == max_time {
            tags[i] = info.last_msgid.tags()[0];
            tagactive = i as u8;
        }
    }
    let last_msgid = if n == 1 {
        MessageId::single(max_time, tags[0])
    } else {
        MessageId::with_tags(max_time, &tags, tagactive)
    };
    Some(ChannelInfo {
        messages,
        last_seen,
        subscribers,
        last_msgid,
    })
}
