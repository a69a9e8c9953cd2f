//! Configuration module for the relay.
//!
//! Settings come from command-line flags, `FAKE_*` environment variables and
//! an optional TOML file. Flags and environment take precedence over the file.

use crate::topology::{Topology, TopologyError, DEFAULT_TOPOLOGY};
use clap::builder::BoolishValueParser;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "fake-elasticache")]
#[command(version)]
#[command(
    about = "Memcached relay that answers cluster auto-discovery with a static topology",
    long_about = None
)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long, env = "FAKE_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "FAKE_PORT")]
    pub port: Option<u16>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long, env = "FAKE_WORKERS")]
    pub workers: Option<usize>,

    /// Backend memcached host
    #[arg(long, env = "FAKE_PROXY_MEMCACHED_HOST")]
    pub proxy_memcached_host: Option<String>,

    /// Backend memcached port
    #[arg(long, env = "FAKE_PROXY_MEMCACHED_PORT")]
    pub proxy_memcached_port: Option<u16>,

    /// Topology returned to discovery clients (host|ip|port, space separated)
    #[arg(long, env = "FAKE_CLUSTER_NODES")]
    pub cluster_nodes: Option<String>,

    /// Log every request/response pair
    #[arg(
        long,
        env = "FAKE_TRACE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub trace: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

/// Backend memcached. Both fields are required once all sources are merged.
#[derive(Debug, Deserialize, Default)]
pub struct BackendConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Topology handed to discovery clients
#[derive(Debug, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_nodes")]
    pub nodes: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub trace: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            trace: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    11211
}

fn default_nodes() -> String {
    DEFAULT_TOPOLOGY.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub backend_host: String,
    pub backend_port: u16,
    pub cluster_nodes: Topology,
    pub trace: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args, environment and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let backend_host = cli
            .proxy_memcached_host
            .or(toml_config.backend.host)
            .filter(|host| !host.is_empty())
            .ok_or(ConfigError::MissingSetting {
                flag: "proxy-memcached-host",
                env: "FAKE_PROXY_MEMCACHED_HOST",
            })?;

        let backend_port = cli
            .proxy_memcached_port
            .or(toml_config.backend.port)
            .ok_or(ConfigError::MissingSetting {
                flag: "proxy-memcached-port",
                env: "FAKE_PROXY_MEMCACHED_PORT",
            })?;

        let nodes = cli.cluster_nodes.unwrap_or(toml_config.cluster.nodes);
        let cluster_nodes = Topology::parse(&nodes)?;

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            workers: cli
                .workers
                .or(toml_config.server.workers)
                .filter(|&workers| workers > 0),
            backend_host,
            backend_port,
            cluster_nodes,
            trace: cli.trace.unwrap_or(toml_config.logging.trace),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// `host:port` of the backend memcached
    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.backend_host, self.backend_port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Missing required setting --{flag} (or {env})")]
    MissingSetting {
        flag: &'static str,
        env: &'static str,
    },
    #[error("Invalid cluster nodes: {0}")]
    Topology(#[from] TopologyError),
}
