//! Message identifiers
//!
//! A message id is a `(time, tag-vector)` pair with a distinguished active
//! position. Within one channel ids are ordered by `(time, tags[0])`; across
//! the component channels of a composite channel each tag position advances
//! independently. Small tag vectors are stored inline, larger ones on the
//! heap.

use std::fmt;

use thiserror::Error;

use crate::core::constants::{MULTITAG_LIMIT, MULTITAG_MAX};

/// Wire form `"<time>:<tags>"` parse failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MsgIdParseError {
    /// No `:` between time and tags
    #[error("message id has no ':' separator")]
    NoSeparator,
    /// Unparseable time or too many tag positions
    #[error("malformed message id")]
    Malformed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum TagRepr {
    Fixed { len: u8, tags: [i16; MULTITAG_MAX] },
    Heap(Vec<i16>),
}

/// Message identifier
///
/// `time == -1` means "newest", `time == 0` means "oldest". A tag of `-1`
/// means "no advance" on that position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageId {
    pub time: i64,
    pub tagactive: u8,
    repr: TagRepr,
}

impl MessageId {
    /// Single-channel id with one tag position
    pub fn single(time: i64, tag: i16) -> Self {
        let mut tags = [0i16; MULTITAG_MAX];
        tags[0] = tag;
        Self {
            time,
            tagactive: 0,
            repr: TagRepr::Fixed { len: 1, tags },
        }
    }

    /// The zero id: oldest message, tag 0
    pub fn zero() -> Self {
        Self::single(0, 0)
    }

    /// Resume point for "only new messages"
    pub fn newest() -> Self {
        Self::single(-1, 0)
    }

    /// Id with an explicit tag vector. `tags` must be non-empty and at most
    /// [`MULTITAG_LIMIT`] long; `tagactive` must index into it.
    pub fn with_tags(time: i64, tags: &[i16], tagactive: u8) -> Self {
        debug_assert!(!tags.is_empty() && tags.len() <= MULTITAG_LIMIT);
        debug_assert!((tagactive as usize) < tags.len());
        let repr = if tags.len() <= MULTITAG_MAX {
            let mut fixed = [0i16; MULTITAG_MAX];
            fixed[..tags.len()].copy_from_slice(tags);
            TagRepr::Fixed {
                len: tags.len() as u8,
                tags: fixed,
            }
        } else {
            TagRepr::Heap(tags.to_vec())
        };
        Self {
            time,
            tagactive,
            repr,
        }
    }

    pub fn tagcount(&self) -> usize {
        match &self.repr {
            TagRepr::Fixed { len, .. } => *len as usize,
            TagRepr::Heap(v) => v.len(),
        }
    }

    pub fn tags(&self) -> &[i16] {
        match &self.repr {
            TagRepr::Fixed { len, tags } => &tags[..*len as usize],
            TagRepr::Heap(v) => v,
        }
    }

    fn tags_mut(&mut self) -> &mut [i16] {
        match &mut self.repr {
            TagRepr::Fixed { len, tags } => &mut tags[..*len as usize],
            TagRepr::Heap(v) => v,
        }
    }

    /// The tag at the active position
    pub fn active_tag(&self) -> i16 {
        self.tags()[self.tagactive as usize]
    }

    /// Grow the tag vector to `n` positions, filling new ones with `fill`.
    /// No-op when already at least `n` long.
    pub fn grow(&mut self, n: usize, fill: i16) {
        if n <= self.tagcount() {
            return;
        }
        let mut v: Vec<i16> = self.tags().to_vec();
        v.resize(n, fill);
        self.repr = if n <= MULTITAG_MAX {
            let mut fixed = [0i16; MULTITAG_MAX];
            fixed[..n].copy_from_slice(&v);
            TagRepr::Fixed {
                len: n as u8,
                tags: fixed,
            }
        } else {
            TagRepr::Heap(v)
        };
    }

    /// Parse the compound wire form `"<time>:<tags>"` where `<tags>` is a
    /// comma-separated list, `[` marks the active position and a lone `-` is
    /// shorthand for `-1`.
    pub fn parse(s: &str) -> Result<Self, MsgIdParseError> {
        let (time_part, tag_part) = s.split_once(':').ok_or(MsgIdParseError::NoSeparator)?;
        let time: i64 = time_part
            .parse()
            .ok()
            .filter(|t| *t >= 0)
            .ok_or(MsgIdParseError::Malformed)?;

        let mut tags: Vec<i16> = Vec::with_capacity(1);
        let mut tagactive: u8 = 0;
        let mut sign: i16 = 1;
        let mut val: i16 = 0;
        for c in tag_part.chars() {
            match c {
                '-' => sign = -1,
                '0'..='9' => val = val.wrapping_mul(10).wrapping_add(c as i16 - '0' as i16),
                '[' => tagactive = tags.len().min(u8::MAX as usize) as u8,
                ',' => {
                    if tags.len() >= MULTITAG_LIMIT {
                        return Err(MsgIdParseError::Malformed);
                    }
                    tags.push(close_tag(val, sign));
                    sign = 1;
                    val = 0;
                }
                _ => {}
            }
        }
        if tags.len() >= MULTITAG_LIMIT {
            return Err(MsgIdParseError::Malformed);
        }
        tags.push(close_tag(val, sign));

        if (tagactive as usize) >= tags.len() {
            return Err(MsgIdParseError::Malformed);
        }
        Ok(Self::with_tags(time, &tags, tagactive))
    }

    /// Expand a single-channel id into an `out_count`-position composite id:
    /// the tag at `in_n` lands at position `out_n`, every other position gets
    /// `fill`.
    pub fn expand_multi(&self, in_n: usize, out_n: usize, out_count: usize, fill: i16) -> Self {
        debug_assert!(in_n < self.tagcount() && out_n < out_count);
        let v = self.tags()[in_n];
        let mut tags = vec![fill; out_count];
        tags[out_n] = v;
        Self::with_tags(self.time, &tags, out_n as u8)
    }

    /// Merge an arriving message's id into this subscriber cursor.
    ///
    /// Single-tag ids replace the cursor wholesale. For composite ids, same
    /// second merges position-wise (skipping `-1`), different second replaces.
    /// Applying the same id twice yields the same cursor.
    pub fn update(&mut self, newid: &MessageId) {
        if newid.tagcount() == 1 {
            *self = newid.clone();
            return;
        }
        if newid.tagcount() > self.tagcount() {
            self.grow(newid.tagcount(), -1);
        }
        if self.time != newid.time {
            *self = newid.clone();
            return;
        }
        let newtags = newid.tags();
        for (old, new) in self.tags_mut().iter_mut().zip(newtags) {
            if *new != -1 {
                *old = *new;
            }
        }
        self.tagactive = newid.tagactive;
    }

    /// Single-channel ordering by `(time, tags[0])`
    pub fn is_after(&self, other: &MessageId) -> bool {
        self.time > other.time || (self.time == other.time && self.tags()[0] > other.tags()[0])
    }

    /// The tag portion of the wire form, as carried in `Etag` headers
    pub fn tag_string(&self) -> String {
        let mut out = String::new();
        let multi = self.tagcount() > 1;
        for (i, tag) in self.tags().iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            if multi && i == self.tagactive as usize {
                out.push('[');
                out.push_str(&tag.to_string());
                out.push(']');
            } else {
                out.push_str(&tag.to_string());
            }
        }
        out
    }
}

fn close_tag(val: i16, sign: i16) -> i16 {
    // lone "-" is shorthand for -1
    if val == 0 && sign == -1 { -1 } else { val * sign }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.time, self.tag_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single() {
        let id = MessageId::parse("1400000000:0").unwrap();
        assert_eq!(id.time, 1400000000);
        assert_eq!(id.tags(), &[0]);
        assert_eq!(id.tagactive, 0);
    }

    #[test]
    fn parse_multi_with_active_bracket() {
        let id = MessageId::parse("99:0,[1],-1").unwrap();
        assert_eq!(id.tags(), &[0, 1, -1]);
        assert_eq!(id.tagactive, 1);
    }

    #[test]
    fn parse_dash_shorthand() {
        let id = MessageId::parse("10:-,5").unwrap();
        assert_eq!(id.tags(), &[-1, 5]);
    }

    #[test]
    fn parse_empty_tags_defaults_to_zero() {
        let id = MessageId::parse("10:").unwrap();
        assert_eq!(id.tags(), &[0]);
    }

    #[test]
    fn parse_no_separator() {
        assert_eq!(MessageId::parse("12345"), Err(MsgIdParseError::NoSeparator));
    }

    #[test]
    fn parse_bad_time() {
        assert_eq!(MessageId::parse("abc:0"), Err(MsgIdParseError::Malformed));
        assert_eq!(MessageId::parse("-1:0"), Err(MsgIdParseError::Malformed));
    }

    #[test]
    fn parse_accepts_255_tags_rejects_256() {
        let ok = format!("5:{}", vec!["1"; 255].join(","));
        let id = MessageId::parse(&ok).unwrap();
        assert_eq!(id.tagcount(), 255);

        let too_many = format!("5:{}", vec!["1"; 256].join(","));
        assert_eq!(MessageId::parse(&too_many), Err(MsgIdParseError::Malformed));
    }

    #[test]
    fn format_roundtrip() {
        for s in ["1400000000:0", "99:0,[1],-1", "7:3,-1,[0],2", "0:0"] {
            let id = MessageId::parse(s).unwrap();
            assert_eq!(id.to_string(), s, "roundtrip of {s}");
        }
    }

    #[test]
    fn heap_tags_roundtrip() {
        let tags: Vec<i16> = (0..10).collect();
        let id = MessageId::with_tags(50, &tags, 3);
        let reparsed = MessageId::parse(&id.to_string()).unwrap();
        assert_eq!(reparsed, id);
    }

    #[test]
    fn expand_multi_places_active_tag() {
        let single = MessageId::single(100, 7);
        let multi = single.expand_multi(0, 2, 4, -1);
        assert_eq!(multi.time, 100);
        assert_eq!(multi.tags(), &[-1, -1, 7, -1]);
        assert_eq!(multi.tagactive, 2);
    }

    #[test]
    fn update_single_replaces() {
        let mut cursor = MessageId::with_tags(100, &[1, 2, 3], 0);
        cursor.update(&MessageId::single(101, 0));
        assert_eq!(cursor, MessageId::single(101, 0));
    }

    #[test]
    fn update_same_second_merges_non_negative() {
        let mut cursor = MessageId::with_tags(100, &[1, 2, 3], 0);
        let incoming = MessageId::with_tags(100, &[-1, 4, -1], 1);
        cursor.update(&incoming);
        assert_eq!(cursor.tags(), &[1, 4, 3]);
        assert_eq!(cursor.tagactive, 1);
    }

    #[test]
    fn update_different_second_replaces() {
        let mut cursor = MessageId::with_tags(100, &[1, 2, 3], 0);
        let incoming = MessageId::with_tags(101, &[-1, 0, -1], 1);
        cursor.update(&incoming);
        assert_eq!(cursor.tags(), &[-1, 0, -1]);
        assert_eq!(cursor.time, 101);
    }

    #[test]
    fn update_grows_cursor_first() {
        let mut cursor = MessageId::single(100, 5);
        let incoming = MessageId::with_tags(100, &[-1, 1, -1], 1);
        cursor.update(&incoming);
        assert_eq!(cursor.tags(), &[5, 1, -1]);
    }

    #[test]
    fn update_is_idempotent() {
        let mut cursor = MessageId::with_tags(100, &[1, 2, 3], 0);
        let incoming = MessageId::with_tags(100, &[-1, 4, -1], 1);
        cursor.update(&incoming);
        let once = cursor.clone();
        cursor.update(&incoming);
        assert_eq!(cursor, once);
    }

    #[test]
    fn is_after_orders_by_time_then_tag() {
        let a = MessageId::single(100, 0);
        let b = MessageId::single(100, 1);
        let c = MessageId::single(101, 0);
        assert!(b.is_after(&a));
        assert!(c.is_after(&b));
        assert!(!a.is_after(&b));
    }

    #[test]
    fn grow_moves_inline_to_heap() {
        let mut id = MessageId::with_tags(5, &[1, 2, 3, 4], 0);
        id.grow(8, -1);
        assert_eq!(id.tagcount(), 8);
        assert_eq!(&id.tags()[..4], &[1, 2, 3, 4]);
        assert_eq!(&id.tags()[4..], &[-1, -1, -1, -1]);
    }
}
