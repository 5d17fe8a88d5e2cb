//! Dispatcher configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level dispatcher configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Worker fleet settings.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Worker fleet configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Full URLs of worker execute endpoints, e.g.
    /// `http://worker-svc:8001/execute`. Sub-queries are assigned to these
    /// round-robin.
    #[serde(default = "default_worker_urls")]
    pub urls: Vec<String>,

    /// Upper bound on sub-queries per statement. The effective part count
    /// is also capped by the width of the split range.
    #[serde(default = "default_max_parts")]
    pub max_parts: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "squall_dispatcher=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_worker_urls() -> Vec<String> {
    vec!["http://127.0.0.1:8001/execute".to_string()]
}

fn default_max_parts() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            urls: default_worker_urls(),
            max_parts: default_max_parts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `SQUALL_DISPATCHER_HOST` overrides `server.host`
/// - `SQUALL_DISPATCHER_PORT` overrides `server.port`
/// - `SQUALL_WORKER_URLS` overrides `workers.urls` (comma-separated)
/// - `SQUALL_MAX_PARTS` overrides `workers.max_parts`
/// - `SQUALL_LOG_LEVEL` overrides `logging.level`
/// - `SQUALL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("SQUALL_DISPATCHER_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("SQUALL_DISPATCHER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(urls) = std::env::var("SQUALL_WORKER_URLS") {
        let parsed: Vec<String> = urls
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
        if !parsed.is_empty() {
            config.workers.urls = parsed;
        }
    }
    if let Ok(max) = std::env::var("SQUALL_MAX_PARTS") {
        if let Ok(parsed) = max.parse() {
            config.workers.max_parts = parsed;
        }
    }
    if let Ok(level) = std::env::var("SQUALL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("SQUALL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
