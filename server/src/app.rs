//! Core application

use std::sync::Arc;

use anyhow::Result;

use crate::api::{ApiServer, AppState};
use crate::channel::events::EventBroadcaster;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::{AppConfig, StoreBackend};
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::store::memory::MemoryStorageEngine;
use crate::store::redis::RedisStorageEngine;
use crate::store::{ChannelStore, StorageEngine};

pub struct BrokerApp {
    pub shutdown: ShutdownService,
    pub config: Arc<AppConfig>,
    pub store: ChannelStore,
    pub events: EventBroadcaster,
    pub http_client: reqwest::Client,
    /// Kept for bridge teardown during shutdown
    redis_engine: Option<Arc<RedisStorageEngine>>,
}

impl BrokerApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("application starting");

        let (cli_config, command) = cli::parse();
        match command {
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = Arc::new(AppConfig::load(cli)?);
        let shutdown = ShutdownService::new();

        let (engine, redis_engine): (Arc<dyn StorageEngine>, Option<Arc<RedisStorageEngine>>) =
            match config.store.backend {
                StoreBackend::Memory => {
                    let memory = MemoryStorageEngine::new();
                    shutdown
                        .register(memory.start_reaper_task(shutdown.subscribe()))
                        .await;
                    (Arc::new(memory), None)
                }
                StoreBackend::Redis => {
                    let url = config
                        .store
                        .redis_url
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("redis_url missing"))?;
                    let redis = Arc::new(
                        RedisStorageEngine::new(url)
                            .await
                            .map_err(|e| anyhow::anyhow!("failed to initialize Redis engine: {e}"))?,
                    );
                    (Arc::clone(&redis) as Arc<dyn StorageEngine>, Some(redis))
                }
            };

        let store = ChannelStore::new(engine);
        tracing::debug!(engine = store.engine_name(), "storage engine initialized");

        let events = EventBroadcaster::new(store.clone(), config.events.clone());

        let redirect = if config.publisher.authorize_follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };
        let http_client = reqwest::Client::builder().redirect(redirect).build()?;

        Ok(Self {
            shutdown,
            config,
            store,
            events,
            http_client,
            redis_engine,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();

        let server = ApiServer::new(app);
        let app = server.start().await?;

        app.shutdown.shutdown().await;
        if let Some(redis) = &app.redis_engine {
            redis.shutdown().await;
        }
        tracing::debug!("shutdown complete");
        Ok(())
    }

    /// Shared state handed to every location handler
    pub fn state(&self) -> AppState {
        AppState {
            config: Arc::clone(&self.config),
            store: self.store.clone(),
            events: self.events.clone(),
            http_client: self.http_client.clone(),
            shutdown_rx: self.shutdown.subscribe(),
        }
    }
}
