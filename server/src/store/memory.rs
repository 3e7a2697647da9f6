//! In-memory storage engine
//!
//! Per-channel history in a `VecDeque` with count and age bounds, live
//! fan-out over `tokio::broadcast`. Channels are created lazily on first
//! publish or subscribe and reaped by a background task once idle past
//! their `channel_timeout` with no subscribers.
//!
//! Suitable for a single process; cross-machine deployments use the Redis
//! engine.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

use super::{
    ChannelSettings, ChannelSubscription, Delivery, PublishOutcome, PublishStatus, StorageEngine,
    StoreError,
};
use crate::channel::info::ChannelInfo;
use crate::channel::message::{Message, MessageDraft};
use crate::channel::msgid::MessageId;
use crate::core::constants::{BROADCAST_CAPACITY, REAPER_INTERVAL_SECS};

struct ChannelSlot {
    history: VecDeque<Arc<Message>>,
    sender: broadcast::Sender<Delivery>,
    subscribers: Arc<AtomicU64>,
    last_seen: i64,
    last_published: MessageId,
    channel_timeout: i64,
}

impl ChannelSlot {
    fn new(channel_timeout: i64) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            history: VecDeque::new(),
            sender,
            subscribers: Arc::new(AtomicU64::new(0)),
            last_seen: 0,
            last_published: MessageId::zero(),
            channel_timeout,
        }
    }

    fn drop_expired(&mut self, now: i64) {
        while let Some(front) = self.history.front() {
            if front.is_expired(now) {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            messages: self.history.len() as u64,
            last_seen: self.last_seen,
            subscribers: self.subscribers.load(Ordering::SeqCst),
            last_msgid: self.last_published.clone(),
        }
    }
}

struct SharedState {
    channels: RwLock<HashMap<String, ChannelSlot>>,
}

/// In-memory storage engine
pub struct MemoryStorageEngine {
    state: Arc<SharedState>,
}

impl Clone for MemoryStorageEngine {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MemoryStorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState {
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Destroy channels idle past their timeout with no subscribers
    pub fn start_reaper_task(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(REAPER_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        let now = Utc::now().timestamp();
                        let mut channels = state.channels.write();
                        let before = channels.len();
                        channels.retain(|_, slot| {
                            slot.drop_expired(now);
                            slot.subscribers.load(Ordering::SeqCst) > 0
                                || slot.last_seen + slot.channel_timeout > now
                        });
                        let reaped = before - channels.len();
                        if reaped > 0 {
                            tracing::debug!(reaped, "reaped idle channels");
                        }
                    }
                }
            }
        })
    }
}

/// Decrements the channel's subscriber count when the subscription drops
struct SubscriberGuard {
    subscribers: Arc<AtomicU64>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageEngine for MemoryStorageEngine {
    async fn publish(
        &self,
        channel: &str,
        draft: MessageDraft,
        settings: &ChannelSettings,
    ) -> Result<PublishOutcome, StoreError> {
        let now = Utc::now().timestamp();
        let mut channels = self.state.channels.write();
        let slot = channels
            .entry(channel.to_owned())
            .or_insert_with(|| ChannelSlot::new(settings.channel_timeout));
        slot.channel_timeout = settings.channel_timeout;

        let tag = if slot.last_published.time == now {
            slot.last_published.tags()[0].saturating_add(1)
        } else {
            0
        };
        let msg = Arc::new(Message {
            id: MessageId::single(now, tag),
            prev_id: slot.last_published.clone(),
            content_type: draft.content_type,
            body: draft.body,
            expires: now + settings.buffer_timeout,
        });

        slot.history.push_back(Arc::clone(&msg));
        slot.drop_expired(now);
        while slot.history.len() > settings.max_messages {
            slot.history.pop_front();
        }

        let receivers = slot.sender.send(Delivery::Message(msg.clone())).unwrap_or(0);
        slot.last_published = msg.id.clone();
        slot.last_seen = now;

        let status = if receivers > 0 {
            PublishStatus::Received
        } else {
            PublishStatus::Queued
        };
        Ok(PublishOutcome {
            status,
            channel: slot.info(),
        })
    }

    async fn find_channel(&self, channel: &str) -> Result<Option<ChannelInfo>, StoreError> {
        Ok(self.state.channels.read().get(channel).map(ChannelSlot::info))
    }

    async fn delete_channel(&self, channel: &str) -> Result<Option<ChannelInfo>, StoreError> {
        let removed = self.state.channels.write().remove(channel);
        Ok(removed.map(|slot| {
            let info = slot.info();
            // end live subscriptions
            let _ = slot.sender.send(Delivery::Deleted);
            info
        }))
    }

    async fn subscribe(
        &self,
        channel: &str,
        resume: MessageId,
    ) -> Result<ChannelSubscription, StoreError> {
        let now = Utc::now().timestamp();
        let (snapshot, mut rx, guard) = {
            let mut channels = self.state.channels.write();
            let slot = channels
                .entry(channel.to_owned())
                .or_insert_with(|| ChannelSlot::new(ChannelSettings::default().channel_timeout));
            slot.last_seen = now;
            slot.drop_expired(now);

            let snapshot: Vec<Arc<Message>> = match resume.time {
                -1 => Vec::new(),
                0 => slot.history.iter().cloned().collect(),
                _ => slot
                    .history
                    .iter()
                    .filter(|m| m.id.is_after(&resume))
                    .cloned()
                    .collect(),
            };

            slot.subscribers.fetch_add(1, Ordering::SeqCst);
            let guard = SubscriberGuard {
                subscribers: Arc::clone(&slot.subscribers),
            };
            (snapshot, slot.sender.subscribe(), guard)
        };

        let mut cursor = match resume.time {
            -1 => MessageId::single(-1, 0),
            _ => MessageId::single(resume.time.max(0), resume.tags()[0]),
        };
        let receiver = stream! {
            let _guard = guard;
            for m in snapshot {
                cursor = m.id.clone();
                yield Ok(Delivery::Message(m));
            }
            loop {
                match rx.recv().await {
                    Ok(Delivery::Message(m)) => {
                        // snapshot and live ranges can overlap at the boundary
                        if m.id.is_after(&cursor) {
                            cursor = m.id.clone();
                            yield Ok(Delivery::Message(m));
                        }
                    }
                    Ok(Delivery::Deleted) => {
                        yield Ok(Delivery::Deleted);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(StoreError::Lagged(n));
                    }
                }
            }
        };

        Ok(ChannelSubscription {
            receiver: Box::pin(receiver),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn engine_name(&self) -> &'static str {
        "memory"
    }
}
