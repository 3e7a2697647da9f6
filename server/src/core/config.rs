//! Application configuration
//!
//! Layered: defaults, then an optional JSON config file (`hubbub.json` in
//! the working directory or `--config <path>`), then CLI arguments (which
//! carry env-var fallbacks via clap).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_BUFFER_TIMEOUT_SECS, DEFAULT_CHANNEL_GROUP,
    DEFAULT_CHANNEL_TIMEOUT_SECS, DEFAULT_EVENT_TEMPLATE, DEFAULT_HOST,
    DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_CHANNEL_ID_LENGTH, DEFAULT_MAX_MESSAGES, DEFAULT_PORT,
    DEFAULT_SUBSCRIBER_TIMEOUT_SECS,
};
use crate::channel::events::EventsSettings;
use crate::store::ChannelSettings;

// =============================================================================
// Backend enums
// =============================================================================

/// Storage engine selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            _ => Err(format!(
                "Invalid store backend '{s}'. Valid options: memory, redis"
            )),
        }
    }
}

/// Where a subscriber resume token may come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeSource {
    Header(String),
    Query(String),
}

impl ResumeSource {
    /// Parse `header:<name>` / `query:<name>`
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.split_once(':') {
            Some(("header", name)) if !name.is_empty() => Ok(Self::Header(name.to_lowercase())),
            Some(("query", name)) if !name.is_empty() => Ok(Self::Query(name.to_owned())),
            _ => Err(format!(
                "Invalid resume source '{s}'. Use header:<name> or query:<name>"
            )),
        }
    }
}

// =============================================================================
// File config (all fields optional)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreFileConfig {
    pub backend: Option<String>,
    pub redis_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelsFileConfig {
    pub group: Option<String>,
    pub max_channel_id_length: Option<usize>,
    pub split_delimiter: Option<String>,
    pub max_messages: Option<usize>,
    pub buffer_timeout: Option<i64>,
    pub channel_timeout: Option<i64>,
    pub start_at_oldest: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublisherFileConfig {
    pub http: Option<bool>,
    pub websocket: Option<bool>,
    pub channel_id_params: Option<Vec<String>>,
    pub authorize_url: Option<String>,
    pub authorize_follow_redirects: Option<bool>,
    pub max_body_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriberFileConfig {
    pub longpoll: Option<bool>,
    pub intervalpoll: Option<bool>,
    pub eventsource: Option<bool>,
    pub chunked: Option<bool>,
    pub multipart: Option<bool>,
    pub websocket: Option<bool>,
    pub channel_id_params: Option<Vec<String>>,
    pub timeout: Option<u64>,
    pub msg_in_etag_only: Option<bool>,
    pub last_msgid_sources: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CorsFileConfig {
    pub allow_origin: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsFileConfig {
    pub channel_id: Option<String>,
    pub template: Option<String>,
}

/// Root of the JSON config file
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub store: Option<StoreFileConfig>,
    pub channels: Option<ChannelsFileConfig>,
    pub publisher: Option<PublisherFileConfig>,
    pub subscriber: Option<SubscriberFileConfig>,
    pub cors: Option<CorsFileConfig>,
    pub events: Option<EventsFileConfig>,
}

impl FileConfig {
    fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

// =============================================================================
// Runtime config
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Prefix for every resolved channel id
    pub group: String,
    /// Upper bound on an evaluated id value, pre-split
    pub max_channel_id_length: usize,
    /// When set, evaluated id values split into composite channels
    pub split_delimiter: Option<String>,
    pub max_messages: usize,
    pub buffer_timeout: i64,
    pub channel_timeout: i64,
    /// Default resume point: oldest buffered message instead of newest
    pub start_at_oldest: bool,
}

impl ChannelConfig {
    pub fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            max_messages: self.max_messages,
            buffer_timeout: self.buffer_timeout,
            channel_timeout: self.channel_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// HTTP publishing (POST/PUT/DELETE/GET-info/OPTIONS)
    pub http: bool,
    /// Long-lived websocket publisher connections
    pub websocket: bool,
    /// Ordered query parameters evaluated for the publisher channel id
    pub channel_id_params: Vec<String>,
    /// Pre-publish authorization sub-request URL
    pub authorize_url: Option<String>,
    /// Follow 3xx on the authorization sub-request instead of denying
    pub authorize_follow_redirects: bool,
    pub max_body_size: usize,
}

#[derive(Clone, Debug)]
pub struct SubscriberConfig {
    pub longpoll: bool,
    pub intervalpoll: bool,
    pub eventsource: bool,
    pub chunked: bool,
    pub multipart: bool,
    pub websocket: bool,
    /// Ordered query parameters evaluated for the subscriber channel id
    pub channel_id_params: Vec<String>,
    /// Longpoll wait in seconds; 0 waits until disconnect
    pub timeout: u64,
    /// Resume point comes only from a compound `If-None-Match`
    pub msg_in_etag_only: bool,
    /// Ordered fallback sources for the resume token
    pub last_msgid_sources: Vec<ResumeSource>,
}

impl SubscriberConfig {
    pub fn any_enabled(&self) -> bool {
        self.longpoll
            || self.intervalpoll
            || self.eventsource
            || self.chunked
            || self.multipart
            || self.websocket
    }
}

#[derive(Clone, Debug)]
pub struct CorsConfig {
    /// Literal origin to allow, or `*`
    pub allow_origin: String,
}

/// Fully resolved application configuration
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub channels: ChannelConfig,
    pub publisher: PublisherConfig,
    pub subscriber: SubscriberConfig,
    pub cors: CorsConfig,
    pub events: Option<EventsSettings>,
}

impl AppConfig {
    /// Load configuration from all sources.
    ///
    /// Priority (lowest to highest): defaults, config file, CLI arguments
    /// (which include env-var fallbacks via clap).
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("loading application configuration");

        let file_path: Option<PathBuf> = if let Some(path) = &cli.config {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            local.exists().then_some(local)
        };

        let file_config = match &file_path {
            Some(path) => {
                let cfg = FileConfig::load_from_file(path)?;
                tracing::debug!(config = %path.display(), "config file loaded");
                cfg
            }
            None => FileConfig::default(),
        };

        let file_server = file_config.server.unwrap_or_default();
        let file_store = file_config.store.unwrap_or_default();
        let file_channels = file_config.channels.unwrap_or_default();
        let file_publisher = file_config.publisher.unwrap_or_default();
        let file_subscriber = file_config.subscriber.unwrap_or_default();
        let file_cors = file_config.cors.unwrap_or_default();

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT),
        };

        let backend = match (&cli.store_backend, &file_store.backend) {
            (Some(b), _) => *b,
            (None, Some(s)) => StoreBackend::parse(s).map_err(anyhow::Error::msg)?,
            (None, None) => StoreBackend::default(),
        };
        let store = StoreConfig {
            backend,
            redis_url: cli.redis_url.clone().or(file_store.redis_url),
        };
        if store.backend == StoreBackend::Redis && store.redis_url.is_none() {
            anyhow::bail!("store.redis_url is required for the redis backend");
        }

        let channels = ChannelConfig {
            group: file_channels
                .group
                .unwrap_or_else(|| DEFAULT_CHANNEL_GROUP.to_owned()),
            max_channel_id_length: file_channels
                .max_channel_id_length
                .unwrap_or(DEFAULT_MAX_CHANNEL_ID_LENGTH),
            split_delimiter: file_channels.split_delimiter.filter(|d| !d.is_empty()),
            max_messages: file_channels.max_messages.unwrap_or(DEFAULT_MAX_MESSAGES),
            buffer_timeout: file_channels
                .buffer_timeout
                .unwrap_or(DEFAULT_BUFFER_TIMEOUT_SECS),
            channel_timeout: file_channels
                .channel_timeout
                .unwrap_or(DEFAULT_CHANNEL_TIMEOUT_SECS),
            start_at_oldest: file_channels.start_at_oldest.unwrap_or(true),
        };

        let publisher = PublisherConfig {
            http: file_publisher.http.unwrap_or(true),
            websocket: file_publisher.websocket.unwrap_or(false),
            channel_id_params: file_publisher
                .channel_id_params
                .unwrap_or_else(|| vec!["id".to_owned()]),
            authorize_url: file_publisher.authorize_url.filter(|u| !u.is_empty()),
            authorize_follow_redirects: file_publisher
                .authorize_follow_redirects
                .unwrap_or(false),
            max_body_size: file_publisher.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE),
        };

        let last_msgid_sources = match file_subscriber.last_msgid_sources {
            Some(sources) => sources
                .iter()
                .map(|s| ResumeSource::parse(s).map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?,
            None => vec![
                ResumeSource::Header("last-event-id".to_owned()),
                ResumeSource::Query("last_event_id".to_owned()),
            ],
        };
        let subscriber = SubscriberConfig {
            longpoll: file_subscriber.longpoll.unwrap_or(true),
            intervalpoll: file_subscriber.intervalpoll.unwrap_or(false),
            eventsource: file_subscriber.eventsource.unwrap_or(true),
            chunked: file_subscriber.chunked.unwrap_or(false),
            multipart: file_subscriber.multipart.unwrap_or(false),
            websocket: file_subscriber.websocket.unwrap_or(true),
            channel_id_params: file_subscriber
                .channel_id_params
                .unwrap_or_else(|| vec!["id".to_owned()]),
            timeout: file_subscriber
                .timeout
                .unwrap_or(DEFAULT_SUBSCRIBER_TIMEOUT_SECS),
            msg_in_etag_only: file_subscriber.msg_in_etag_only.unwrap_or(false),
            last_msgid_sources,
        };

        let cors = CorsConfig {
            allow_origin: file_cors.allow_origin.unwrap_or_else(|| "*".to_owned()),
        };

        let events = file_config.events.and_then(|e| {
            e.channel_id.map(|channel_id| EventsSettings {
                channel_id,
                template: e.template.unwrap_or_else(|| DEFAULT_EVENT_TEMPLATE.to_owned()),
            })
        });

        Ok(Self {
            server,
            store,
            channels,
            publisher,
            subscriber,
            cors,
            events,
        })
    }
}
