//! Channel domain model
//!
//! - `msgid` - composite message identifiers
//! - `message` - messages and publisher drafts
//! - `id` - channel id resolution and composite encoding
//! - `info` - channel stats and content negotiation
//! - `miss` - missed-message detection
//! - `events` - broker lifecycle meta events

pub mod events;
pub mod id;
pub mod info;
pub mod message;
pub mod miss;
pub mod msgid;

pub use events::{BrokerEvent, EventBroadcaster, EventContext, EventsSettings};
pub use id::ChannelId;
pub use info::ChannelInfo;
pub use message::{Message, MessageDraft};
pub use msgid::MessageId;
