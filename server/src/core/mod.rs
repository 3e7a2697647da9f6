//! Core application infrastructure

pub mod cli;
pub mod config;
pub mod constants;
pub mod shutdown;

pub use crate::app::BrokerApp;
pub use cli::{CliConfig, Commands};
pub use config::{AppConfig, ServerConfig, StoreBackend};
pub use shutdown::ShutdownService;
