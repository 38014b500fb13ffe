//! API authentication.

use crate::error::{AppError, Result};
use axum::http::{HeaderMap, header};
use std::collections::HashMap;

/// Resolves a bearer token to the user it belongs to.
pub trait Authenticator: Send + Sync {
    /// Return the user ID for `token`, or `None` if the token is unknown.
    fn authenticate(&self, token: &str) -> Result<Option<String>>;
}

/// Fixed token table loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuth {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuth {
    /// Create from a `token -> user_id` map. Empty tokens or user IDs are ignored.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        let tokens = tokens
            .into_iter()
            .filter(|(token, user)| !token.is_empty() && !user.is_empty())
            .collect();
        Self { tokens }
    }

    /// Number of usable tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token is configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokenAuth {
    fn authenticate(&self, token: &str) -> Result<Option<String>> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// Generate a random API token.
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Extract token from Authorization header.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the calling user from request headers.
pub fn authenticate_headers(auth: &dyn Authenticator, headers: &HeaderMap) -> Result<String> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    auth.authenticate(token)?
        .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))
}
