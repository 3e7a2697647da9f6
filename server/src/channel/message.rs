//! Channel messages
//!
//! Messages are created by a publisher, owned by the storage engine, and
//! shared by reference count among the channel history, in-flight deliveries
//! and in-transit serializer buffers (`Arc<Message>` plus the cheap-clone
//! `Bytes` payload).

use bytes::Bytes;

use super::msgid::MessageId;

/// A message as stored and delivered
#[derive(Clone, Debug)]
pub struct Message {
    /// Own id, assigned by the storage engine at publish time
    pub id: MessageId,
    /// Id of the immediately previous message on the same channel; used by
    /// the miss detector
    pub prev_id: MessageId,
    /// `Content-Type` copied verbatim from the publish request
    pub content_type: Option<String>,
    /// Opaque payload
    pub body: Bytes,
    /// Unix second after which the engine may evict this message
    pub expires: i64,
}

impl Message {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires <= now
    }

    /// Retention span this message was stored with
    pub fn ttl(&self) -> i64 {
        self.expires - self.id.time
    }
}

/// Publisher-side message input; the engine assigns id, prev id and expiry
#[derive(Clone, Debug)]
pub struct MessageDraft {
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl MessageDraft {
    pub fn new(content_type: Option<String>, body: Bytes) -> Self {
        Self { content_type, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_inclusive_at_boundary() {
        let msg = Message {
            id: MessageId::single(100, 0),
            prev_id: MessageId::zero(),
            content_type: None,
            body: Bytes::from_static(b"x"),
            expires: 160,
        };
        assert!(!msg.is_expired(159));
        assert!(msg.is_expired(160));
        assert_eq!(msg.ttl(), 60);
    }
}
