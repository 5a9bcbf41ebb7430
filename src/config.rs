//! Configuration module for the counter server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocol::{DEFAULT_MAX_PAYLOAD_LEN, PAYLOAD_LEN};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the counter server
#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(version = "0.1.0")]
#[command(about = "Shared counter server", long_about = None)]
pub struct ServerArgs {
    /// Number of worker reactor threads
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// TCP port to listen on
    pub port: u16,

    /// Address to bind to (defaults to all interfaces)
    #[arg(long)]
    pub host: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// listen(2) backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backlog: default_backlog(),
        }
    }
}

/// Per-worker reactor tuning
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Readiness events fetched per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    /// Bytes read from one connection per readiness event
    #[serde(default = "default_read_budget")]
    pub read_budget: usize,
    /// Size of a single read call
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Connections a single worker will hold
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            events_capacity: default_events_capacity(),
            read_budget: default_read_budget(),
            read_chunk: default_read_chunk(),
            max_connections: default_max_connections(),
        }
    }
}

/// Wire protocol limits
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Largest declared payload length accepted before a stream is rejected
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_payload_len: default_max_payload_len(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_backlog() -> i32 {
    1024
}

fn default_events_capacity() -> usize {
    1024
}

fn default_read_budget() -> usize {
    64 * 1024
}

fn default_read_chunk() -> usize {
    16 * 1024
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_payload_len() -> u32 {
    DEFAULT_MAX_PAYLOAD_LEN
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub backlog: i32,
    pub events_capacity: usize,
    pub read_budget: usize,
    pub read_chunk: usize,
    pub max_connections: usize,
    pub max_payload_len: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(
            ServerArgs {
                workers: 1,
                port: 0,
                host: None,
                config: None,
                log_level: None,
            },
            TomlConfig::default(),
        )
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    /// Resolve already-parsed CLI args, reading the TOML file they name.
    pub fn from_args(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    // CLI takes precedence
    fn merge(cli: ServerArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            workers: usize::from(cli.workers),
            backlog: toml_config.server.backlog,
            events_capacity: toml_config.worker.events_capacity,
            read_budget: toml_config.worker.read_budget,
            read_chunk: toml_config.worker.read_chunk,
            max_connections: toml_config.worker.max_connections,
            max_payload_len: toml_config.protocol.max_payload_len,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("workers", self.workers),
            ("worker.events_capacity", self.events_capacity),
            ("worker.read_budget", self.read_budget),
            ("worker.read_chunk", self.read_chunk),
            ("worker.max_connections", self.max_connections),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if (self.max_payload_len as usize) < PAYLOAD_LEN {
            return Err(ConfigError::Invalid(format!(
                "protocol.max_payload_len must be at least {PAYLOAD_LEN}"
            )));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
