mod schema;

pub use schema::Database;

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Outcome of the most recent sync attempt of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Never synced.
    Never,
    /// Last sync completed.
    Success,
    /// Last sync failed.
    Error,
}

impl SyncStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Never => "never",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(SyncStatus::Never),
            "success" => Ok(SyncStatus::Success),
            "error" => Ok(SyncStatus::Error),
            other => Err(AppError::Database(format!("Unknown sync status: {}", other))),
        }
    }
}

/// A user's remote WebDAV server.
#[derive(Clone, Serialize)]
pub struct Connection {
    /// Connection ID.
    pub id: String,
    /// Owner user ID.
    pub user_id: String,
    /// Root URL of the remote library.
    pub base_url: String,
    /// WebDAV username.
    pub username: String,
    /// Sealed password (`nonce || ciphertext`).
    #[serde(skip_serializing)]
    pub encrypted_secret: Vec<u8>,
    /// Result of the last sync attempt.
    pub last_sync_status: SyncStatus,
    /// Error message of the last failed sync.
    pub last_error: String,
    /// Timestamp of the last sync attempt.
    pub last_sync_at: Option<i64>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("encrypted_secret", &"[REDACTED]")
            .field("last_sync_status", &self.last_sync_status)
            .field("last_error", &self.last_error)
            .field("last_sync_at", &self.last_sync_at)
            .finish()
    }
}

/// Catalog entry for a book discovered on a remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Book ID.
    pub id: String,
    /// Owner user ID.
    pub user_id: String,
    /// Book title.
    pub title: String,
    /// Author, empty when unknown.
    pub author: String,
    /// Format name (e.g. "epub").
    pub format: String,
    /// Absolute path on the remote server.
    pub source_path: String,
    /// Connection that last supplied this book.
    pub connection_id: String,
    /// Whether the file was absent from the latest sync.
    pub missing: bool,
    /// Last update timestamp.
    pub updated_at: i64,
}

impl Book {
    /// New catalog entry for `source_path`; ID and timestamps are assigned on upsert.
    pub fn discovered(
        source_path: impl Into<String>,
        title: impl Into<String>,
        format: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            user_id: String::new(),
            title: title.into(),
            author: String::new(),
            format: format.into(),
            source_path: source_path.into(),
            connection_id: connection_id.into(),
            missing: false,
            updated_at: 0,
        }
    }
}

/// Lifecycle state of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Persisted and waiting in the buffer.
    Queued,
    /// Picked up by the worker.
    Running,
    /// Handler finished without error.
    Success,
    /// Handler returned an error.
    Error,
}

impl TaskStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error)
    }

    /// Whether `next` is a legal forward step from this status.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Error)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "error" => Ok(TaskStatus::Error),
            other => Err(AppError::Database(format!("Unknown task status: {}", other))),
        }
    }
}

/// Background job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task ID.
    pub id: String,
    /// Owner user ID.
    pub user_id: String,
    /// Task kind (e.g. "format").
    #[serde(rename = "type")]
    pub task_type: String,
    /// Current status.
    pub status: TaskStatus,
    /// Handler error message, empty unless status is error.
    pub error: String,
    /// Handler input.
    pub payload: BTreeMap<String, String>,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

impl Task {
    /// A new `queued` task; ID and timestamps are assigned on create.
    pub fn new(
        user_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: String::new(),
            user_id: user_id.into(),
            task_type: task_type.into(),
            status: TaskStatus::Queued,
            error: String::new(),
            payload,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Move to `next`, rejecting backward or repeated transitions.
    pub fn transition(&mut self, next: TaskStatus) -> crate::error::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
