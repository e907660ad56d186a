//! Server configuration.
//!
//! Loaded from a TOML file; every field has a default so a missing file or
//! an empty table yields a runnable server.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Server configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener and connection-engine settings
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Worker thread configuration
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Account database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and parse the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Number of worker threads to run.
    pub fn threads(&self) -> usize {
        self.workers.threads.unwrap_or(DEFAULT_WORKERS)
    }
}

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 8;

/// Listener configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Port to listen on (0 binds an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Trigger mode: 0 level, 1 edge on connections, 2 edge on the
    /// listener, 3 edge on both. Names are accepted too.
    #[serde(default)]
    pub trigger_mode: TriggerMode,

    /// Idle connection timeout in milliseconds; 0 disables timing out
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Document root; relative paths resolve against the working directory
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for ListenerConfig {
    fn default() -> ListenerConfig {
        ListenerConfig {
            port: default_port(),
            trigger_mode: TriggerMode::default(),
            timeout_ms: default_timeout_ms(),
            root: default_root(),
        }
    }
}

/// Edge/level trigger selection for the listener and connection sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Level-triggered everywhere.
    Level,
    /// Edge-triggered connection sockets, level-triggered listener.
    EdgeConn,
    /// Edge-triggered listener, level-triggered connection sockets.
    EdgeListen,
    /// Edge-triggered everywhere.
    #[default]
    EdgeBoth,
}

impl TriggerMode {
    /// Whether the listener socket is edge-triggered.
    pub fn listen_edge(self) -> bool {
        matches!(self, TriggerMode::EdgeListen | TriggerMode::EdgeBoth)
    }

    /// Whether connection sockets are edge-triggered.
    pub fn conn_edge(self) -> bool {
        matches!(self, TriggerMode::EdgeConn | TriggerMode::EdgeBoth)
    }
}

impl<'de> Deserialize<'de> for TriggerMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum TriggerValue {
            Int(u8),
            String(String),
        }

        match TriggerValue::deserialize(deserializer)? {
            TriggerValue::Int(0) => Ok(TriggerMode::Level),
            TriggerValue::Int(1) => Ok(TriggerMode::EdgeConn),
            TriggerValue::Int(2) => Ok(TriggerMode::EdgeListen),
            TriggerValue::Int(3) => Ok(TriggerMode::EdgeBoth),
            TriggerValue::Int(n) => Err(serde::de::Error::custom(format!(
                "invalid trigger_mode: {} (expected 0-3)",
                n
            ))),
            TriggerValue::String(s) => match s.to_lowercase().as_str() {
                "level" | "lt" => Ok(TriggerMode::Level),
                "edge-conn" | "et-conn" => Ok(TriggerMode::EdgeConn),
                "edge-listen" | "et-listen" => Ok(TriggerMode::EdgeListen),
                "edge" | "edge-both" | "et-both" | "et" => Ok(TriggerMode::EdgeBoth),
                _ => Err(serde::de::Error::custom(format!(
                    "invalid trigger_mode: '{}' (expected 'level', 'edge-conn', \
                     'edge-listen', or 'edge-both')",
                    s
                ))),
            },
        }
    }
}

/// Worker thread configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of worker threads (default: 8)
    pub threads: Option<usize>,
}

/// Account database configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Whether login/register requests consult the database at all
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Database name
    #[serde(default = "default_db_name")]
    pub name: String,

    /// Connections kept in the pool; sized to the worker count in practice
    #[serde(default = "default_db_pool_size")]
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> DatabaseConfig {
        DatabaseConfig {
            enabled: false,
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            name: default_db_name(),
            pool_size: default_db_pool_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (`RUST_LOG` takes precedence when set)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write to rotating files under `dir` instead of stderr
    #[serde(default)]
    pub file: bool,

    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Log file name suffix
    #[serde(default = "default_log_suffix")]
    pub suffix: String,

    /// Async queue capacity; 0 writes synchronously on the caller's thread
    #[serde(default = "default_log_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            level: default_log_level(),
            file: false,
            dir: default_log_dir(),
            suffix: default_log_suffix(),
            queue_capacity: default_log_queue_capacity(),
        }
    }
}

// Default value functions

fn default_port() -> u16 {
    1316
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_root() -> PathBuf {
    PathBuf::from("resources")
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_user() -> String {
    "root".to_string()
}

fn default_db_name() -> String {
    "webserver".to_string()
}

fn default_db_pool_size() -> usize {
    12
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("log")
}

fn default_log_suffix() -> String {
    ".log".to_string()
}

fn default_log_queue_capacity() -> usize {
    1024
}
