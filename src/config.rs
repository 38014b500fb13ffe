use crate::crypto::{self, SecretKey};
use crate::error::{AppError, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `[webdav] key`.
pub const KEY_ENV: &str = "DAVSHELF_WEBDAV_KEY";

/// Sync WebDAV book libraries into a local catalog.
#[derive(Parser, Debug, Clone)]
#[command(name = "davshelf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "DAVSHELF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Print a freshly generated encryption key.
    Key,

    /// WebDAV connection management.
    Connection {
        /// Connection subcommand action.
        #[command(subcommand)]
        action: ConnectionCommand,
    },

    /// Sync every connection once and exit.
    SyncAll,

    /// Background task inspection.
    Task {
        /// Task subcommand action.
        #[command(subcommand)]
        action: TaskCommand,
    },
}

/// Connection management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ConnectionCommand {
    /// Register a WebDAV server for a user.
    Add {
        /// Owner user ID.
        #[arg(short, long)]
        user: String,
        /// Root URL of the remote library.
        base_url: String,
        /// WebDAV username.
        username: String,
        /// WebDAV password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// List a user's connections.
    List {
        /// Owner user ID.
        #[arg(short, long)]
        user: String,
    },

    /// Remove a connection.
    Del {
        /// Owner user ID.
        #[arg(short, long)]
        user: String,
        /// Connection ID.
        id: String,
    },

    /// Sync one connection now.
    Sync {
        /// Owner user ID.
        #[arg(short, long)]
        user: String,
        /// Connection ID.
        id: String,
    },
}

/// Task subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum TaskCommand {
    /// List a user's tasks, newest first.
    List {
        /// Owner user ID.
        #[arg(short, long)]
        user: String,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// WebDAV configuration.
    #[serde(default)]
    pub webdav: WebDavConfig,

    /// Task queue configuration.
    #[serde(default)]
    pub tasks: TasksConfig,

    /// API authentication.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/davshelf.db")
}

/// WebDAV configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDavConfig {
    /// Secret encryption key, 64 hex characters or base64 of 32 bytes.
    #[serde(default)]
    pub key: String,

    /// Background sync interval in seconds (0 to disable).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,

    /// Timeout for a single WebDAV request in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            sync_interval_seconds: default_sync_interval(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_sync_interval() -> u64 {
    20 * 60
}

fn default_request_timeout() -> u64 {
    30
}

impl WebDavConfig {
    /// Resolve the encryption key, preferring the environment override.
    pub fn secret_key(&self) -> Result<SecretKey> {
        self.secret_key_with(std::env::var(KEY_ENV).ok())
    }

    fn secret_key_with(&self, env_key: Option<String>) -> Result<SecretKey> {
        let raw = env_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| self.key.clone());

        if raw.trim().is_empty() {
            return Err(AppError::Config(format!(
                "No WebDAV key configured. Set [webdav] key or {}",
                KEY_ENV
            )));
        }
        crypto::parse_key(&raw)
    }

    /// Sync interval, or `None` when background sync is disabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_seconds > 0).then(|| Duration::from_secs(self.sync_interval_seconds))
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

/// Task queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Channel capacity (0 uses the queue's default).
    #[serde(default = "default_task_buffer")]
    pub buffer: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            buffer: default_task_buffer(),
        }
    }
}

fn default_task_buffer() -> usize {
    200
}

/// API authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token to user ID.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("davshelf.toml"),
            dirs::config_dir()
                .map(|p| p.join("davshelf").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/davshelf/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content with a fresh key and API token.
    pub fn generate_default() -> String {
        format!(
            r#"# davshelf configuration

[server]
bind = "0.0.0.0:8080"

[database]
# path = "/var/lib/davshelf/davshelf.db"

[webdav]
# Encrypts stored WebDAV passwords. Losing it makes every stored password
# unreadable. Can also be set with {env}.
key = "{key}"
# Background sync interval in seconds (0 to disable)
sync_interval_seconds = 1200
request_timeout_seconds = 30

[tasks]
buffer = 200

# Bearer tokens accepted by the HTTP API, mapped to user IDs
[auth.tokens]
"{token}" = "admin"
"#,
            env = KEY_ENV,
            key = crypto::generate_key(),
            token = crate::auth::generate_token(),
        )
    }
}
