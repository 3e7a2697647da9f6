//! Broker lifecycle events
//!
//! When an event channel is configured, subscriber and channel transitions
//! are published as synthetic messages under the `meta` group with a fixed
//! small retention. Event publication failures are logged and swallowed;
//! they never affect the triggering operation.

use bytes::Bytes;

use super::msgid::MessageId;
use crate::core::constants::META_CHANNEL_GROUP;
use crate::store::{ChannelSettings, ChannelStore};
use crate::channel::id::ChannelId;
use crate::channel::message::MessageDraft;

/// Broker lifecycle transitions that produce meta events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerEvent {
    SubscriberEnqueue,
    SubscriberDequeue,
    SubscriberReceiveMessage,
    SubscriberReceiveStatus,
    ChannelPublish,
    ChannelDelete,
}

impl BrokerEvent {
    pub fn name(self) -> &'static str {
        match self {
            Self::SubscriberEnqueue => "subscriber_enqueue",
            Self::SubscriberDequeue => "subscriber_dequeue",
            Self::SubscriberReceiveMessage => "subscriber_receive_message",
            Self::SubscriberReceiveStatus => "subscriber_receive_status",
            Self::ChannelPublish => "channel_publish",
            Self::ChannelDelete => "channel_delete",
        }
    }
}

/// What the triggering request knows at emission time
#[derive(Clone, Debug, Default)]
pub struct EventContext {
    /// Wire form of the triggering channel id
    pub channel_id: String,
    /// Current message id, when the trigger has one
    pub msgid: Option<MessageId>,
    /// Previous message id, when the trigger has one
    pub prev_msgid: Option<MessageId>,
}

/// Event channel configuration, evaluated per emission
#[derive(Clone, Debug)]
pub struct EventsSettings {
    /// Bare event channel id; `{channel_id}` expands to the triggering
    /// channel's wire form
    pub channel_id: String,
    /// Payload template; `{event}`, `{channel_id}`, `{msgid}` and
    /// `{prev_msgid}` expand
    pub template: String,
}

/// Publishes meta events through the storage engine
#[derive(Clone)]
pub struct EventBroadcaster {
    store: ChannelStore,
    settings: Option<EventsSettings>,
}

impl EventBroadcaster {
    pub fn new(store: ChannelStore, settings: Option<EventsSettings>) -> Self {
        Self { store, settings }
    }

    pub fn enabled(&self) -> bool {
        self.settings.is_some()
    }

    /// Publish one event. Never fails; errors are logged and dropped.
    pub async fn emit(&self, event: BrokerEvent, ctx: &EventContext) {
        let Some(settings) = &self.settings else {
            return;
        };
        let id = render(&settings.channel_id, event, ctx);
        let channel = ChannelId::Single(format!("{META_CHANNEL_GROUP}/{id}"));
        let payload = render(&settings.template, event, ctx);
        let draft = MessageDraft::new(Some("text/plain".to_owned()), Bytes::from(payload));
        if let Err(e) = self
            .store
            .publish(&channel, draft, &ChannelSettings::meta_events())
            .await
        {
            tracing::warn!(error = %e, event = event.name(), "failed to publish channel event");
        }
    }
}

fn render(template: &str, event: BrokerEvent, ctx: &EventContext) -> String {
    template
        .replace("{event}", event.name())
        .replace("{channel_id}", &ctx.channel_id)
        .replace(
            "{msgid}",
            &ctx.msgid.as_ref().map(MessageId::to_string).unwrap_or_default(),
        )
        .replace(
            "{prev_msgid}",
            &ctx.prev_msgid
                .as_ref()
                .map(MessageId::to_string)
                .unwrap_or_default(),
        )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use tokio::time::{Duration, timeout};

    use super::*;
    use crate::store::memory::MemoryStorageEngine;
    use crate::store::Delivery;

    fn broadcaster(settings: Option<EventsSettings>) -> (EventBroadcaster, ChannelStore) {
        let store = ChannelStore::new(Arc::new(MemoryStorageEngine::new()));
        (EventBroadcaster::new(store.clone(), settings), store)
    }

    #[test]
    fn render_expands_placeholders() {
        let ctx = EventContext {
            channel_id: "g/a".into(),
            msgid: Some(MessageId::single(100, 1)),
            prev_msgid: Some(MessageId::single(100, 0)),
        };
        let out = render(
            "{event} {channel_id} {msgid} {prev_msgid}",
            BrokerEvent::ChannelPublish,
            &ctx,
        );
        assert_eq!(out, "channel_publish g/a 100:1 100:0");
    }

    #[tokio::test]
    async fn emit_publishes_to_meta_channel() {
        let (broadcaster, store) = broadcaster(Some(EventsSettings {
            channel_id: "events".into(),
            template: "{event} {channel_id}".into(),
        }));

        let meta = ChannelId::Single("meta/events".into());
        let mut sub = store
            .subscribe(&meta, MessageId::newest())
            .await
            .unwrap();

        let ctx = EventContext {
            channel_id: "g/x".into(),
            ..EventContext::default()
        };
        broadcaster.emit(BrokerEvent::SubscriberEnqueue, &ctx).await;

        let delivery = timeout(Duration::from_secs(1), sub.receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match delivery {
            Delivery::Message(m) => {
                assert_eq!(&m.body[..], b"subscriber_enqueue g/x");
            }
            Delivery::Deleted => panic!("unexpected delete"),
        }
    }

    #[tokio::test]
    async fn emit_is_a_noop_when_unconfigured() {
        let (broadcaster, store) = broadcaster(None);
        broadcaster
            .emit(BrokerEvent::ChannelPublish, &EventContext::default())
            .await;
        let meta = ChannelId::Single("meta/".into());
        assert!(store.find_channel(&meta).await.unwrap().is_none());
    }
}
