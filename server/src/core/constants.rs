// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "hubbub";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "hubbub.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "HUBBUB_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "HUBBUB_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "HUBBUB_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "HUBBUB_LOG";

/// Environment variable for the storage engine (memory or redis)
pub const ENV_STORE_BACKEND: &str = "HUBBUB_STORE_BACKEND";

/// Environment variable for the Redis URL (redis engine only)
pub const ENV_REDIS_URL: &str = "HUBBUB_REDIS_URL";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 8480;

/// Default maximum publish body size in bytes
pub const DEFAULT_MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

// =============================================================================
// Message IDs
// =============================================================================

/// Maximum tag positions stored inline; larger tag vectors go to the heap
pub const MULTITAG_MAX: usize = 4;

/// Hard cap on tag positions in a message id (and channels in a composite id)
pub const MULTITAG_LIMIT: usize = 255;

/// Reserved separator inside composite channel ids. A validated channel id
/// can never contain this byte.
pub const MULTI_SEP_CHR: char = '\u{1F}';

// =============================================================================
// Channel Defaults
// =============================================================================

/// Default channel group prefix
pub const DEFAULT_CHANNEL_GROUP: &str = "pubsub";

/// Default upper bound on an evaluated channel id, pre-split
pub const DEFAULT_MAX_CHANNEL_ID_LENGTH: usize = 512;

/// Default per-channel message history bound
pub const DEFAULT_MAX_MESSAGES: usize = 10;

/// Default message retention in seconds
pub const DEFAULT_BUFFER_TIMEOUT_SECS: i64 = 3600;

/// Default idle-channel lifetime in seconds
pub const DEFAULT_CHANNEL_TIMEOUT_SECS: i64 = 30;

/// Default longpoll wait in seconds (0 = wait until disconnect)
pub const DEFAULT_SUBSCRIBER_TIMEOUT_SECS: u64 = 30;

/// Legacy channel-id query parameter
pub const LEGACY_CHANNEL_ID_PARAM: &str = "push_channel_id";

// =============================================================================
// Meta Events
// =============================================================================

/// Channel group for broker lifecycle events
pub const META_CHANNEL_GROUP: &str = "meta";

/// Message retention on meta event channels, in seconds
pub const META_BUFFER_TIMEOUT_SECS: i64 = 10;

/// Idle lifetime of meta event channels, in seconds
pub const META_CHANNEL_TIMEOUT_SECS: i64 = 30;

/// Default meta event payload template
pub const DEFAULT_EVENT_TEMPLATE: &str = "{event} {channel_id}";

// =============================================================================
// Transports
// =============================================================================

/// Fan-out channel capacity per channel
pub const BROADCAST_CAPACITY: usize = 1024;

/// Eventsource keep-alive comment interval in seconds
pub const SSE_KEEPALIVE_SECS: u64 = 30;

/// Boundary for multipart/mixed subscriber responses
pub const MULTIPART_BOUNDARY: &str = "HubbubFrame";

// =============================================================================
// Shutdown
// =============================================================================

/// Seconds to wait for background tasks during graceful shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Idle-channel reaper scan interval in seconds
pub const REAPER_INTERVAL_SECS: u64 = 5;
