//! API server and routes

pub mod publisher;
pub mod pubsub;
mod server;
pub mod subscriber;
pub mod types;

use std::sync::Arc;

use tokio::sync::watch;

use crate::channel::events::EventBroadcaster;
use crate::core::config::AppConfig;
use crate::store::ChannelStore;

pub use server::ApiServer;

/// Shared state for every pub/sub location
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: ChannelStore,
    pub events: EventBroadcaster,
    /// Client for authorization sub-requests; redirect policy follows config
    pub http_client: reqwest::Client,
    pub shutdown_rx: watch::Receiver<bool>,
}
