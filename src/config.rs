//! Configuration module for the maxmsg echo service.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::channel::{ChannelSpec, DEFAULT_FORMAT, DEFAULT_MAX_MSG, DEFAULT_NAME};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the echo service
#[derive(Parser, Debug)]
#[command(name = "maxmsg")]
#[command(author = "maxmsg authors")]
#[command(version = "0.1.0")]
#[command(about = "An echo service bound to a named request/reply channel", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the channel to (e.g., 127.0.0.1:5555)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Channel name
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Maximum message size in bytes
    #[arg(short = 'm', long)]
    pub max_msg: Option<usize>,

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
    pub channel: ChannelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Channel binding configuration
#[derive(Debug, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_format")]
    pub request_format: String,
    #[serde(default = "default_format")]
    pub reply_format: String,
    /// Maximum message size in bytes
    #[serde(default = "default_max_msg")]
    pub max_msg: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            request_format: default_format(),
            reply_format: default_format(),
            max_msg: default_max_msg(),
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

fn default_listen() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_max_msg() -> usize {
    DEFAULT_MAX_MSG
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub channel: ChannelSpec,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let channel = toml_config.channel;

        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            channel: ChannelSpec {
                name: cli.name.unwrap_or(channel.name),
                request_format: channel.request_format,
                reply_format: channel.reply_format,
                max_msg: cli.max_msg.unwrap_or(channel.max_msg),
            },
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
