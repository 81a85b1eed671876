//! Configuration module for the hello-timeout fixture.
//!
//! The listening address and worker count come from positional command-line
//! arguments. Everything else has a default and may be tuned through an
//! optional TOML file. CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the concurrency width. Larger values would ask the OS for
/// more threads than it is likely to grant.
pub const MAX_WORKERS: usize = 1024;

/// Command-line arguments for the fixture
#[derive(Parser, Debug)]
#[command(name = "hello-timeout")]
#[command(version = "0.1.0")]
#[command(about = "Answers every request with a fixed HTTP-like response", long_about = None)]
pub struct CliArgs {
    /// IPv4 address to bind to
    #[arg(value_name = "HOST-IPV4")]
    pub host: Ipv4Addr,

    /// Port to bind to
    #[arg(value_name = "PORT")]
    pub port: u16,

    /// Number of runtime worker threads (0 = one per CPU core, at most 1024)
    #[arg(value_name = "CONCURRENCY-WIDTH")]
    pub workers: usize,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

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
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the dispatcher does when `accept` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcceptPolicy {
    /// Terminate the process.
    #[default]
    Fatal,
    /// Log the error and keep accepting.
    Log,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Set SO_REUSEPORT so several processes can share the port
    #[serde(default)]
    pub reuse_port: bool,
    /// Set TCP_NODELAY on accepted connections
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
    /// Cap on concurrently served connections (unbounded when absent)
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub accept_errors: AcceptPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            reuse_port: false,
            nodelay: default_nodelay(),
            max_connections: None,
            accept_errors: AcceptPolicy::default(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Read deadline in milliseconds (0 = no deadline)
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Write deadline in milliseconds (0 = no deadline)
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Size of the per-connection read buffer
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
            buffer_size: default_buffer_size(),
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

fn default_backlog() -> u32 {
    1024
}

fn default_nodelay() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_buffer_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: Ipv4Addr,
    pub port: u16,
    pub workers: usize,
    pub backlog: u32,
    pub reuse_port: bool,
    pub nodelay: bool,
    pub max_connections: Option<usize>,
    pub accept_errors: AcceptPolicy,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub buffer_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    ///
    /// Exits with a usage message when the arguments do not parse.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge already-parsed CLI args with the TOML file they point at.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host,
            port: cli.port,
            workers: cli.workers,
            backlog: toml_config.server.backlog,
            reuse_port: toml_config.server.reuse_port,
            nodelay: toml_config.server.nodelay,
            max_connections: toml_config.server.max_connections,
            accept_errors: toml_config.server.accept_errors,
            read_timeout: timeout_from_ms(toml_config.connection.read_timeout_ms),
            write_timeout: timeout_from_ms(toml_config.connection.write_timeout_ms),
            buffer_size: toml_config.connection.buffer_size,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Reject values the listener or handler cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers > MAX_WORKERS {
            let msg = format!("concurrency width must be at most {MAX_WORKERS}");
            return Err(ConfigError::Invalid(msg));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer_size must be at least 1".into(),
            ));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be at least 1".into()));
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }

    /// Number of runtime worker threads, resolving 0 to the CPU count.
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 {
            num_cpus()
        } else {
            self.workers
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
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
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
