//! `reqwest`-backed WebDAV client.

use super::multistatus::{self, Listing};
use super::{Content, Entry, WebDavClient};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use url::Url;

/// WebDAV client speaking HTTP(S).
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    /// Create a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("davshelf/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Wrap an existing `reqwest` client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Issue one depth-1 PROPFIND and classify the children of `url`.
    async fn list_depth_one(&self, url: &Url, username: &str, secret: &str) -> Result<Listing> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| AppError::Internal(format!("Invalid HTTP method: {}", e)))?;

        let response = self
            .http
            .request(method, url.clone())
            .basic_auth(username, Some(secret))
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml")
            .body(multistatus::propfind_body())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::MULTI_STATUS && status != StatusCode::OK {
            return Err(AppError::RemoteStatus {
                status: status.as_u16(),
                url: multistatus::display_url(url),
            });
        }

        let body = response.text().await?;
        let parsed = multistatus::parse_multistatus(&body)?;
        Ok(multistatus::classify(url, parsed))
    }
}

#[async_trait]
impl WebDavClient for HttpClient {
    async fn list(&self, base_url: &str, username: &str, secret: &str) -> Result<Vec<Entry>> {
        let start = multistatus::start_url(base_url)?;
        let started = std::time::Instant::now();

        let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
        let mut queue = VecDeque::from([start]);
        let mut seen_files = HashSet::new();
        let mut files = Vec::new();
        let mut requests = 0usize;

        while let Some(current) = queue.pop_front() {
            let listing = self.list_depth_one(&current, username, secret).await?;
            requests += 1;

            for entry in listing.files {
                if seen_files.insert(entry.path.clone()) {
                    files.push(entry);
                }
            }

            // Visited set, not depth, is what stops server-side cycles.
            for dir in listing.dirs {
                if visited.insert(dir.to_string()) {
                    queue.push_back(dir);
                }
            }
        }

        tracing::debug!(
            directories = requests,
            files = files.len(),
            elapsed = ?started.elapsed(),
            "WebDAV crawl complete"
        );

        Ok(files)
    }

    async fn fetch(
        &self,
        base_url: &str,
        username: &str,
        secret: &str,
        path: &str,
    ) -> Result<Content> {
        let mut url = multistatus::start_url(base_url)?;
        url.set_query(None);
        url.set_fragment(None);
        // Listed paths are decoded; each segment must be encoded again.
        url.path_segments_mut()
            .map_err(|_| AppError::Validation(format!("Invalid base URL: {}", base_url)))?
            .clear()
            .extend(path.trim_start_matches('/').split('/'));

        let response = self
            .http
            .get(url.clone())
            .basic_auth(username, Some(secret))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("Remote file {}", path)));
        }
        if !status.is_success() {
            return Err(AppError::RemoteStatus {
                status: status.as_u16(),
                url: multistatus::display_url(&url),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));

        Ok(Content {
            stream: Box::pin(stream),
            content_type,
        })
    }
}
