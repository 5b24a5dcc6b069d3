//! Configuration for the game store server.
//!
//! One record enumerates everything the server needs: listener addresses,
//! storage roots, transfer limits, session settings, game-server spawning,
//! and logging. Values come from a JSON config file when present,
//! environment variables second, and code defaults last — see [`loader`].

pub mod loader;

pub use loader::load;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub session: SessionConfig,
    pub game_server: GameServerConfig,
    pub logging: LoggingConfig,
}

/// Listener addresses and port probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bind host for both listeners.
    pub lobby_host: String,
    /// Preferred lobby (player) port.
    pub lobby_port: u16,
    /// Preferred developer port.
    pub developer_port: u16,
    /// How many consecutive ports to probe when the preferred one is taken.
    pub port_probe_limit: u16,
}

/// Durable state locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Root of the packaged/extracted game tree.
    pub games_dir: PathBuf,
    /// Scratch space for in-flight upload sinks.
    pub temp_dir: PathBuf,
    /// Reserved for future plugin artifacts; created at startup.
    pub plugins_dir: PathBuf,
}

/// File transfer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Download/upload chunk size in bytes.
    pub chunk_size: usize,
    /// Largest accepted upload in bytes.
    pub max_file_size: u64,
    /// Largest accepted wire frame in bytes.
    pub max_frame_size: usize,
}

/// Authentication and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Process-wide salt mixed into password digests. Client verification
    /// paths must use the same value.
    pub password_salt: String,
    /// Lifetime of issued session tokens, in seconds.
    pub session_timeout: u64,
}

/// Game-server child process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameServerConfig {
    /// First port handed to a spawned game server; the counter only grows.
    pub start_port: u16,
    /// Interpreter used to run a game's `game_server.py`.
    pub python_bin: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level; `RUST_LOG` is consulted when unset, falling back to `info`.
    pub level: Option<LogLevel>,
    /// Log file path; file logging is disabled when unset.
    pub log_file: Option<PathBuf>,
    /// File rotation: `daily`, `hourly`, or `never`.
    pub rotation: String,
}

/// Supported log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            lobby_host: "0.0.0.0".to_string(),
            lobby_port: 8888,
            developer_port: 8889,
            port_probe_limit: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("database/game_store.db"),
            games_dir: PathBuf::from("games"),
            temp_dir: PathBuf::from("temp"),
            plugins_dir: PathBuf::from("plugins"),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            max_file_size: 100 * 1024 * 1024,
            max_frame_size: 1024 * 1024,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            password_salt: "game-store-salt-2024".to_string(),
            session_timeout: 3600,
        }
    }
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            start_port: 9000,
            python_bin: "python3".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            log_file: None,
            rotation: "daily".to_string(),
        }
    }
}
