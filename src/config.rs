//! Configuration module for compute-session.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values. Client schedules
//! can only come from the file; without one the three reference clients run.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::framing::DEFAULT_MAX_FRAME_SIZE;
use crate::protocol::{parse_command, ParseError};
use crate::session::ClientSchedule;

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "compute-session")]
#[command(version = "0.1.0")]
#[command(about = "Runs accumulator clients against a local compute server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Socket path (unix) or address (tcp) to serve and connect on
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Stream transport
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportType>,

    /// Maximum bytes buffered for one incoming message
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Stream transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Unix-domain stream socket
    #[default]
    Unix,
    /// TCP socket
    Tcp,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Client schedules; the reference set when absent
    pub clients: Option<Vec<ClientConfig>>,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub transport: TransportType,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            transport: TransportType::default(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

/// One client schedule as written in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub id: u32,
    /// Milliseconds between commands
    pub delay_ms: u64,
    /// Command lines, e.g. `"add -2"`
    pub commands: Vec<String>,
}

impl ClientConfig {
    fn new(id: u32, delay_ms: u64, commands: &[&str]) -> Self {
        Self {
            id,
            delay_ms,
            commands: commands.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Parse the command lines into a schedule.
    pub fn to_schedule(&self) -> Result<ClientSchedule, ConfigError> {
        let mut commands = Vec::with_capacity(self.commands.len());
        for line in &self.commands {
            let command = parse_command(line).map_err(|error| ConfigError::InvalidCommand {
                client: self.id,
                line: line.clone(),
                error,
            })?;
            if command.is_query() {
                return Err(ConfigError::QueryInSchedule { client: self.id });
            }
            commands.push(command);
        }
        Ok(ClientSchedule::new(
            self.id,
            Duration::from_millis(self.delay_ms),
            commands,
        ))
    }
}

fn default_endpoint() -> String {
    "compute.sock".to_string()
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_clients() -> Vec<ClientConfig> {
    vec![
        ClientConfig::new(1, 3000, &["init 12", "add -2", "mul 8", "div 10"]),
        ClientConfig::new(2, 500, &["init -5", "add 3", "mul 7", "add -1", "div 5"]),
        ClientConfig::new(3, 2000, &["init 0", "add 2", "mul -4", "add 9"]),
    ]
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub transport: TransportType,
    pub max_frame_size: usize,
    pub log_level: String,
    pub clients: Vec<ClientSchedule>,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve parsed CLI args, reading the TOML file they point to.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
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

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let max_frame_size = cli
            .max_frame_size
            .unwrap_or(toml_config.server.max_frame_size);
        if max_frame_size == 0 {
            return Err(ConfigError::InvalidFrameSize);
        }

        let clients = toml_config
            .clients
            .unwrap_or_else(default_clients)
            .iter()
            .map(ClientConfig::to_schedule)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            endpoint: cli.endpoint.unwrap_or(toml_config.server.endpoint),
            transport: cli.transport.unwrap_or(toml_config.server.transport),
            max_frame_size,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            clients,
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidCommand {
        client: u32,
        line: String,
        error: ParseError,
    },
    QueryInSchedule {
        client: u32,
    },
    InvalidFrameSize,
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
            ConfigError::InvalidCommand {
                client,
                line,
                error,
            } => {
                write!(f, "Client {} has invalid command '{}': {}", client, line, error)
            }
            ConfigError::QueryInSchedule { client } => {
                write!(
                    f,
                    "Client {} schedules 'compute'; it is sent automatically",
                    client
                )
            }
            ConfigError::InvalidFrameSize => write!(f, "max_frame_size must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}
