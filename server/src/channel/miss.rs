//! Missed-message detection
//!
//! On each delivery the arriving message's previous-id is compared against
//! the subscriber's cursor. A mismatch means the subscriber skipped at least
//! one message. The verdict is advisory: it is logged and delivery proceeds.

use super::message::Message;
use super::msgid::MessageId;

/// Advisory outcome of the delivery check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissVerdict {
    /// Cursor and previous-id line up
    Consistent,
    /// Missed, and the cursor is old enough that the gap likely expired out
    /// of the buffer
    ProbablyExpired,
    /// Missed for no identifiable reason (bug, or the queue is too small)
    Unknown,
}

impl MissVerdict {
    pub fn is_miss(self) -> bool {
        !matches!(self, Self::Consistent)
    }
}

/// Compare the subscriber cursor against an arriving message's previous id.
/// Returns `true` when the delivery is consistent (no gap).
fn verify_msg_id(last: &MessageId, prev: &MessageId, id: &MessageId) -> bool {
    // time 0 means no history on either side; -1 means a fresh cursor
    if last.time <= 0 || prev.time <= 0 {
        return true;
    }

    if last.time != prev.time {
        if prev.tagcount() <= 1 {
            return false;
        }
        // A composite forward is acceptable only as the very first message
        // of its sub-channel in this second: exactly one prev position set,
        // and the message's tag there is 0.
        let mut set_position = None;
        for (j, tag) in prev.tags().iter().enumerate() {
            if *tag != -1 {
                if set_position.is_some() {
                    return false;
                }
                set_position = Some(j);
            }
        }
        return match set_position {
            Some(j) => id.tags().get(j).copied() == Some(0),
            None => false,
        };
    }

    if last.tagcount() == 1 {
        return last.tags()[0] == prev.tags()[0];
    }

    let count = last.tagcount().min(prev.tagcount());
    for i in 0..count {
        if prev.tags()[i] != -1 && last.tags()[i] != prev.tags()[i] {
            return false;
        }
    }
    true
}

/// Run the miss check for one delivery and log any gap. Returns the verdict
/// so transports can also surface it to meta events or tests.
pub fn check_delivery(last: &MessageId, msg: &Message, now: i64) -> MissVerdict {
    if verify_msg_id(last, &msg.prev_id, &msg.id) {
        return MissVerdict::Consistent;
    }

    if last.time + msg.ttl() <= now {
        tracing::warn!(
            cursor = %last,
            msgid = %msg.id,
            "missed a message because it probably expired"
        );
        MissVerdict::ProbablyExpired
    } else {
        tracing::warn!(
            cursor = %last,
            msgid = %msg.id,
            prev = %msg.prev_id,
            "missed a message for an unknown reason; maybe the message queue is too small"
        );
        MissVerdict::Unknown
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn msg(id: MessageId, prev: MessageId, ttl: i64) -> Message {
        let expires = id.time + ttl;
        Message {
            id,
            prev_id: prev,
            content_type: None,
            body: Bytes::new(),
            expires,
        }
    }

    #[test]
    fn consecutive_single_channel_is_consistent() {
        let last = MessageId::single(100, 0);
        let m = msg(MessageId::single(100, 1), MessageId::single(100, 0), 60);
        assert_eq!(check_delivery(&last, &m, 100), MissVerdict::Consistent);
    }

    #[test]
    fn zero_time_skips_check() {
        let last = MessageId::zero();
        let m = msg(MessageId::single(100, 5), MessageId::single(100, 4), 60);
        assert_eq!(check_delivery(&last, &m, 100), MissVerdict::Consistent);
    }

    #[test]
    fn fresh_cursor_skips_check() {
        let last = MessageId::newest();
        let m = msg(MessageId::single(100, 5), MessageId::single(100, 4), 60);
        assert_eq!(check_delivery(&last, &m, 100), MissVerdict::Consistent);
    }

    #[test]
    fn tag_gap_is_a_miss() {
        let last = MessageId::single(100, 0);
        let m = msg(MessageId::single(100, 2), MessageId::single(100, 1), 60);
        let verdict = check_delivery(&last, &m, 100);
        assert!(verdict.is_miss());
    }

    #[test]
    fn expired_cursor_is_reported_as_expired() {
        let last = MessageId::single(100, 0);
        let m = msg(MessageId::single(300, 2), MessageId::single(300, 1), 60);
        assert_eq!(check_delivery(&last, &m, 400), MissVerdict::ProbablyExpired);
    }

    #[test]
    fn recent_cursor_miss_is_unknown() {
        let last = MessageId::single(100, 0);
        let m = msg(MessageId::single(101, 2), MessageId::single(101, 1), 600);
        assert_eq!(check_delivery(&last, &m, 102), MissVerdict::Unknown);
    }

    #[test]
    fn first_per_second_of_sub_channel_is_exempt() {
        // cursor from second 100; sub-channel 1 publishes its first message
        // of second 105: prev has only position 1 set, msg tag there is 0
        let last = MessageId::with_tags(100, &[3, 7], 0);
        let m = msg(
            MessageId::with_tags(105, &[-1, 0], 1),
            MessageId::with_tags(100, &[-1, 7], 1),
            60,
        );
        assert_eq!(check_delivery(&last, &m, 105), MissVerdict::Consistent);
    }

    #[test]
    fn first_per_second_exemption_requires_tag_zero() {
        let last = MessageId::with_tags(100, &[3, 7], 0);
        let m = msg(
            MessageId::with_tags(105, &[-1, 2], 1),
            MessageId::with_tags(100, &[-1, 7], 1),
            600,
        );
        assert!(check_delivery(&last, &m, 105).is_miss());
    }

    #[test]
    fn exemption_requires_exactly_one_set_position() {
        let last = MessageId::with_tags(100, &[3, 7], 0);
        let m = msg(
            MessageId::with_tags(105, &[0, 0], 1),
            MessageId::with_tags(100, &[3, 7], 1),
            600,
        );
        assert!(check_delivery(&last, &m, 105).is_miss());
    }

    #[test]
    fn multi_same_second_compares_set_positions_only() {
        let last = MessageId::with_tags(100, &[3, 7], 0);
        let ok = msg(
            MessageId::with_tags(100, &[-1, 8], 1),
            MessageId::with_tags(100, &[-1, 7], 1),
            60,
        );
        assert_eq!(check_delivery(&last, &ok, 100), MissVerdict::Consistent);

        let bad = msg(
            MessageId::with_tags(100, &[-1, 9], 1),
            MessageId::with_tags(100, &[-1, 8], 1),
            600,
        );
        assert!(check_delivery(&last, &bad, 100).is_miss());
    }
}
