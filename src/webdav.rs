//! WebDAV protocol client.
//!
//! Enumerates remote book files with depth-1 `PROPFIND` requests walked
//! breadth-first, and fetches single files for on-demand reading.

mod client;
#[cfg(test)]
pub(crate) mod fixture;
mod multistatus;

pub use client::HttpClient;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;

/// A remote file found during a crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Absolute, percent-decoded path on the server.
    pub path: String,
    /// Size in bytes (0 when the server does not report it).
    pub size: u64,
    /// Last modification time, if reported.
    pub mod_time: Option<DateTime<Utc>>,
}

/// Streamed body of a remote file.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A fetched remote file.
pub struct Content {
    /// File bytes.
    pub stream: ByteStream,
    /// Content type reported by the server.
    pub content_type: String,
}

/// Access to a WebDAV server.
#[async_trait]
pub trait WebDavClient: Send + Sync {
    /// Recursively list every file below `base_url`.
    ///
    /// Fails as a whole if any directory request fails; no partial listing is returned.
    async fn list(&self, base_url: &str, username: &str, secret: &str) -> Result<Vec<Entry>>;

    /// Download one file. `path` is an absolute server path as returned by [`WebDavClient::list`].
    async fn fetch(
        &self,
        base_url: &str,
        username: &str,
        secret: &str,
        path: &str,
    ) -> Result<Content>;
}
