use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::config::StoreBackend;
use super::constants::{ENV_CONFIG, ENV_HOST, ENV_PORT, ENV_REDIS_URL, ENV_STORE_BACKEND};

#[derive(Parser)]
#[command(name = "hubbub")]
#[command(version, about = "HTTP pub/sub broker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Storage engine (memory or redis)
    #[arg(long, global = true, env = ENV_STORE_BACKEND, value_parser = StoreBackend::parse)]
    pub store_backend: Option<StoreBackend>,

    /// Redis connection URL (redis engine only)
    #[arg(long, global = true, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the broker (default command)
    Start,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub store_backend: Option<StoreBackend>,
    pub redis_url: Option<String>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        store_backend: cli.store_backend,
        redis_url: cli.redis_url,
    };
    (config, cli.command)
}
