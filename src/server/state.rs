//! Application state shared across handlers.

use crate::auth::{self, Authenticator};
use crate::error::Result;
use crate::store::BookCatalog;
use crate::sync::SyncService;
use crate::tasks::TaskQueue;
use axum::http::HeaderMap;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Connection management and sync.
    pub sync: Arc<SyncService>,
    /// Background task queue.
    pub queue: TaskQueue,
    /// Book catalog.
    pub catalog: Arc<dyn BookCatalog>,
    /// Bearer token resolution.
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    /// Create application state.
    pub fn new(
        sync: Arc<SyncService>,
        queue: TaskQueue,
        catalog: Arc<dyn BookCatalog>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            sync,
            queue,
            catalog,
            auth,
        }
    }

    /// Resolve the calling user from request headers.
    pub fn user_id(&self, headers: &HeaderMap) -> Result<String> {
        auth::authenticate_headers(self.auth.as_ref(), headers)
    }
}
