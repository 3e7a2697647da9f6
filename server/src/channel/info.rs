//! Channel information responses
//!
//! Aggregate per-channel stats serialized in one of four formats, selected
//! by a deliberately small `Accept` scan: the leftmost `text/<sub>` or
//! `application/<sub>` match wins, qvalues are ignored.

use super::msgid::MessageId;

/// Aggregate channel stats as reported by the storage engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Messages currently held in the channel buffer
    pub messages: u64,
    /// Unix second the channel was last published to or subscribed, 0 = never
    pub last_seen: i64,
    /// Subscribers currently enqueued
    pub subscribers: u64,
    /// Id of the most recently published message
    pub last_msgid: MessageId,
}

impl ChannelInfo {
    pub fn empty() -> Self {
        Self {
            messages: 0,
            last_seen: 0,
            subscribers: 0,
            last_msgid: MessageId::zero(),
        }
    }

    /// Render the info body in `format`. `requested` is `-1` when the
    /// channel has never been seen.
    pub fn render(&self, format: InfoFormat, now: i64) -> String {
        let requested = if self.last_seen == 0 {
            -1
        } else {
            now - self.last_seen
        };
        let msgid = self.last_msgid.to_string();
        match format {
            InfoFormat::Plain => format!(
                "queued messages: {}\nlast requested: {} sec. ago\nactive subscribers: {}\nlast message id: {}\n",
                self.messages, requested, self.subscribers, msgid
            ),
            InfoFormat::Json => format!(
                "{{\"messages\": {}, \"requested\": {}, \"subscribers\": {}, \"last_message_id\": \"{}\"}}",
                self.messages, requested, self.subscribers, msgid
            ),
            InfoFormat::Yaml => format!(
                "---\nmessages: {}\nrequested: {}\nsubscribers: {}\nlast_message_id: {}\n",
                self.messages, requested, self.subscribers, msgid
            ),
            InfoFormat::Xml => format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" ?>\n<channel>\n  <messages>{}</messages>\n  <requested>{}</requested>\n  <subscribers>{}</subscribers>\n  <last_message_id>{}</last_message_id>\n</channel>",
                self.messages, requested, self.subscribers, msgid
            ),
        }
    }
}

/// Info body format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfoFormat {
    Plain,
    Json,
    Yaml,
    Xml,
}

/// Outcome of content negotiation: the format plus the content type to echo
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedInfo {
    pub format: InfoFormat,
    pub content_type: String,
}

const SUBTYPES: &[(&str, InfoFormat)] = &[
    ("plain", InfoFormat::Plain),
    ("json", InfoFormat::Json),
    ("yaml", InfoFormat::Yaml),
    ("xml", InfoFormat::Xml),
    ("x-json", InfoFormat::Json),
    ("x-yaml", InfoFormat::Yaml),
];

/// Select the info format from an `Accept` header. Leftmost match wins;
/// no header or no match falls back to `text/plain`.
pub fn negotiate(accept: Option<&str>) -> NegotiatedInfo {
    let fallback = NegotiatedInfo {
        format: InfoFormat::Plain,
        content_type: "text/plain".to_owned(),
    };
    let Some(accept) = accept else {
        return fallback;
    };

    let mut best: Option<(usize, NegotiatedInfo)> = None;
    for prefix in ["text/", "application/"] {
        let mut offset = 0;
        while let Some(found) = accept[offset..].find(prefix) {
            let at = offset + found;
            let sub_start = at + prefix.len();
            let rest = &accept[sub_start..];
            for (sub, format) in SUBTYPES {
                if rest.starts_with(sub)
                    && best.as_ref().is_none_or(|(pos, _)| sub_start < *pos)
                {
                    best = Some((
                        sub_start,
                        NegotiatedInfo {
                            format: *format,
                            content_type: format!("{prefix}{sub}"),
                        },
                    ));
                }
            }
            offset = sub_start;
        }
    }
    best.map(|(_, n)| n).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_accept_is_plain() {
        let n = negotiate(None);
        assert_eq!(n.format, InfoFormat::Plain);
        assert_eq!(n.content_type, "text/plain");
    }

    #[test]
    fn json_accept() {
        let n = negotiate(Some("application/json"));
        assert_eq!(n.format, InfoFormat::Json);
        assert_eq!(n.content_type, "application/json");
    }

    #[test]
    fn leftmost_match_wins() {
        let n = negotiate(Some("text/xml, application/json"));
        assert_eq!(n.format, InfoFormat::Xml);
        assert_eq!(n.content_type, "text/xml");
    }

    #[test]
    fn x_prefixed_subtypes_map_to_base_format() {
        let n = negotiate(Some("application/x-json"));
        assert_eq!(n.format, InfoFormat::Json);
        assert_eq!(n.content_type, "application/x-json");

        let n = negotiate(Some("text/x-yaml"));
        assert_eq!(n.format, InfoFormat::Yaml);
    }

    #[test]
    fn unknown_subtype_falls_back_to_plain() {
        let n = negotiate(Some("image/png, text/html"));
        assert_eq!(n.format, InfoFormat::Plain);
    }

    #[test]
    fn render_reports_never_seen_as_minus_one() {
        let info = ChannelInfo::empty();
        let body = info.render(InfoFormat::Plain, 1000);
        assert!(body.contains("last requested: -1 sec. ago"), "{body}");
    }

    #[test]
    fn render_json_fields() {
        let info = ChannelInfo {
            messages: 3,
            last_seen: 990,
            subscribers: 2,
            last_msgid: MessageId::single(990, 2),
        };
        let body = info.render(InfoFormat::Json, 1000);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["messages"], 3);
        assert_eq!(parsed["requested"], 10);
        assert_eq!(parsed["subscribers"], 2);
        assert_eq!(parsed["last_message_id"], "990:2");
    }

    #[test]
    fn render_xml_wraps_fields() {
        let info = ChannelInfo::empty();
        let body = info.render(InfoFormat::Xml, 0);
        assert!(body.starts_with("<?xml"));
        assert!(body.contains("<messages>0</messages>"));
    }
}
