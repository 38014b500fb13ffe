//! davshelf: keeps a local book catalog in sync with WebDAV libraries.
//!
//! Users register WebDAV servers holding their books. The engine crawls each
//! server with depth-1 `PROPFIND` requests, reconciles what it finds with the
//! catalog (new books are added, vanished ones are flagged missing, never
//! deleted), and queues a background task for every discovered file.
//!
//! # Features
//!
//! - Breadth-first WebDAV crawl that terminates on cyclic trees
//! - AES-256-GCM encryption of stored WebDAV passwords
//! - Persisted background task queue with a single worker
//! - Periodic sync of every connection
//! - On-demand streaming of book content from its server
//! - Small bearer-token HTTP API and a CLI

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// API token authentication.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Secret encryption.
pub mod crypto;
/// Database operations.
pub mod db;
/// Engine wiring.
pub mod engine;
/// Error types.
pub mod error;
/// Book format detection.
pub mod formats;
/// Periodic sync.
pub mod scheduler;
/// HTTP server.
pub mod server;
/// Storage interfaces.
pub mod store;
/// Sync orchestration.
pub mod sync;
/// Background tasks.
pub mod tasks;
/// WebDAV client.
pub mod webdav;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use engine::Engine;
pub use error::{AppError, Result};
pub use server::AppState;
pub use sync::{SyncReport, SyncService};
