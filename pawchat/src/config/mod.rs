//! Configuration system for the `PawChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pawchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::transport::session::ReconnectConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    engine: EngineFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    broker_url: Option<String>,
    reconnect_base_ms: Option<u64>,
    reconnect_jitter_ms: Option<u64>,
}

/// `[engine]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EngineFileConfig {
    page_size: Option<usize>,
    event_buffer: Option<usize>,
    store_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker WebSocket URL, if networking is configured.
    pub broker_url: Option<String>,
    /// Reconnect timing for the transport session.
    pub reconnect: ReconnectConfig,
    /// Engine tunables (page size, event buffers).
    pub engine: EngineConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            reconnect: ReconnectConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` to enable
    /// unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            broker_url: cli
                .broker_url
                .clone()
                .or_else(|| file.network.broker_url.clone()),
            reconnect: ReconnectConfig {
                base_delay: file
                    .network
                    .reconnect_base_ms
                    .map_or(defaults.reconnect.base_delay, Duration::from_millis),
                jitter_max: file
                    .network
                    .reconnect_jitter_ms
                    .map_or(defaults.reconnect.jitter_max, Duration::from_millis),
            },
            engine: EngineConfig {
                page_size: file.engine.page_size.unwrap_or(defaults.engine.page_size),
                event_buffer: file
                    .engine
                    .event_buffer
                    .unwrap_or(defaults.engine.event_buffer),
                store_buffer: file
                    .engine
                    .store_buffer
                    .unwrap_or(defaults.engine.store_buffer),
            },
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "PawChat conversation sync demo")]
pub struct CliArgs {
    /// WebSocket URL of the topic broker.
    #[arg(long, env = "BROKER_URL")]
    pub broker_url: Option<String>,

    /// Your numeric member id.
    #[arg(long, default_value_t = 1)]
    pub user_id: u64,

    /// Your display name.
    #[arg(long, default_value = "demo-user")]
    pub user_name: String,

    /// Path to config file (default: `~/.config/pawchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAWCHAT_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a missing
/// file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("pawchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
