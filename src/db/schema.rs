use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection as SqliteConnection, OptionalExtension, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const CONNECTION_COLUMNS: &str =
    "id, user_id, base_url, username, encrypted_secret, last_sync_status, last_error, last_sync_at";

const BOOK_COLUMNS: &str =
    "id, user_id, title, author, format, source_path, connection_id, missing, updated_at";

const TASK_COLUMNS: &str = "id, user_id, task_type, status, error, payload, created_at, updated_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = SqliteConnection::open(path)
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = SqliteConnection::open_in_memory()
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- WebDAV connections
            CREATE TABLE IF NOT EXISTS webdav_connections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                base_url TEXT NOT NULL,
                username TEXT NOT NULL,
                encrypted_secret BLOB NOT NULL,
                last_sync_status TEXT NOT NULL DEFAULT 'never',
                last_error TEXT NOT NULL DEFAULT '',
                last_sync_at INTEGER
            );

            -- Books discovered on remote servers
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                format TEXT NOT NULL,
                source_path TEXT NOT NULL,
                connection_id TEXT NOT NULL DEFAULT '',
                missing INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                UNIQUE (user_id, source_path)
            );

            -- Background tasks (history is kept)
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT NOT NULL DEFAULT '',
                payload TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_webdav_user ON webdav_connections(user_id);
            CREATE INDEX IF NOT EXISTS idx_books_user ON books(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id, created_at);
            "#,
        )
        .map_err(|e| AppError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== CONNECTION OPERATIONS ==========

    /// Create a connection, assigning a fresh ID when none is set.
    pub fn create_connection(&self, user_id: &str, mut connection: Connection) -> Result<Connection> {
        if connection.id.is_empty() {
            connection.id = uuid::Uuid::new_v4().to_string();
        }
        connection.user_id = user_id.to_string();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO webdav_connections
             (id, user_id, base_url, username, encrypted_secret, last_sync_status, last_error, last_sync_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                connection.id,
                connection.user_id,
                connection.base_url,
                connection.username,
                connection.encrypted_secret,
                connection.last_sync_status.as_str(),
                connection.last_error,
                connection.last_sync_at,
            ],
        )
        .map_err(|e| AppError::Database(format!("Failed to create connection: {}", e)))?;

        Ok(connection)
    }

    /// List a user's connections.
    pub fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM webdav_connections WHERE user_id = ?1 ORDER BY base_url",
                CONNECTION_COLUMNS
            ))
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let connections = stmt
            .query_map(params![user_id], Self::row_to_connection)
            .map_err(|e| AppError::Database(format!("Failed to list connections: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect connections: {}", e)))?;

        Ok(connections)
    }

    /// List connections of every user.
    pub fn list_all_connections(&self) -> Result<Vec<Connection>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM webdav_connections ORDER BY user_id, base_url",
                CONNECTION_COLUMNS
            ))
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let connections = stmt
            .query_map([], Self::row_to_connection)
            .map_err(|e| AppError::Database(format!("Failed to list connections: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect connections: {}", e)))?;

        Ok(connections)
    }

    /// Get a connection by ID.
    pub fn get_connection(&self, user_id: &str, id: &str) -> Result<Connection> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM webdav_connections WHERE user_id = ?1 AND id = ?2",
                CONNECTION_COLUMNS
            ),
            params![user_id, id],
            Self::row_to_connection,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("WebDAV connection {}", id)))
    }

    /// Replace the credentials of a connection.
    pub fn update_connection(&self, user_id: &str, connection: &Connection) -> Result<Connection> {
        {
            let conn = self.conn.lock();
            let rows = conn
                .execute(
                    "UPDATE webdav_connections
                     SET base_url = ?1, username = ?2, encrypted_secret = ?3
                     WHERE user_id = ?4 AND id = ?5",
                    params![
                        connection.base_url,
                        connection.username,
                        connection.encrypted_secret,
                        user_id,
                        connection.id,
                    ],
                )
                .map_err(|e| AppError::Database(format!("Failed to update connection: {}", e)))?;

            if rows == 0 {
                return Err(AppError::NotFound(format!(
                    "WebDAV connection {}",
                    connection.id
                )));
            }
        }

        self.get_connection(user_id, &connection.id)
    }

    /// Record the outcome of a sync attempt.
    pub fn update_connection_status(
        &self,
        user_id: &str,
        id: &str,
        status: SyncStatus,
        error: &str,
    ) -> Result<Connection> {
        {
            let conn = self.conn.lock();
            let rows = conn
                .execute(
                    "UPDATE webdav_connections
                     SET last_sync_status = ?1, last_error = ?2, last_sync_at = ?3
                     WHERE user_id = ?4 AND id = ?5",
                    params![status.as_str(), error, now_timestamp(), user_id, id],
                )
                .map_err(|e| AppError::Database(format!("Failed to update sync status: {}", e)))?;

            if rows == 0 {
                return Err(AppError::NotFound(format!("WebDAV connection {}", id)));
            }
        }

        self.get_connection(user_id, id)
    }

    /// Delete a connection.
    pub fn delete_connection(&self, user_id: &str, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM webdav_connections WHERE user_id = ?1 AND id = ?2",
                params![user_id, id],
            )
            .map_err(|e| AppError::Database(format!("Failed to delete connection: {}", e)))?;

        if rows == 0 {
            return Err(AppError::NotFound(format!("WebDAV connection {}", id)));
        }
        Ok(())
    }

    fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Connection> {
        Ok(Connection {
            id: row.get(0)?,
            user_id: row.get(1)?,
            base_url: row.get(2)?,
            username: row.get(3)?,
            encrypted_secret: row.get(4)?,
            last_sync_status: parse_column(row, 5)?,
            last_error: row.get(6)?,
            last_sync_at: row.get(7)?,
        })
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a book or refresh the existing one with the same source path.
    ///
    /// The existing ID is kept, `missing` is cleared, and a non-empty author
    /// already on record is not overwritten by an empty one.
    pub fn upsert_book(&self, user_id: &str, book: &Book) -> Result<Book> {
        let id = if book.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            book.id.clone()
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books
             (id, user_id, title, author, format, source_path, connection_id, missing, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
             ON CONFLICT (user_id, source_path) DO UPDATE SET
                title = excluded.title,
                author = CASE WHEN excluded.author = '' THEN books.author ELSE excluded.author END,
                format = excluded.format,
                connection_id = excluded.connection_id,
                missing = 0,
                updated_at = excluded.updated_at",
            params![
                id,
                user_id,
                book.title,
                book.author,
                book.format,
                book.source_path,
                book.connection_id,
                now_timestamp(),
            ],
        )
        .map_err(|e| AppError::Database(format!("Failed to upsert book: {}", e)))?;

        conn.query_row(
            &format!(
                "SELECT {} FROM books WHERE user_id = ?1 AND source_path = ?2",
                BOOK_COLUMNS
            ),
            params![user_id, book.source_path],
            Self::row_to_book,
        )
        .map_err(|e| AppError::Database(format!("Failed to read upserted book: {}", e)))
    }

    /// List a user's books.
    pub fn list_books(&self, user_id: &str) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM books WHERE user_id = ?1 ORDER BY title, source_path",
                BOOK_COLUMNS
            ))
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![user_id], Self::row_to_book)
            .map_err(|e| AppError::Database(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Get a book by ID.
    pub fn get_book(&self, user_id: &str, id: &str) -> Result<Book> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books WHERE user_id = ?1 AND id = ?2", BOOK_COLUMNS),
            params![user_id, id],
            Self::row_to_book,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get book: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Book {}", id)))
    }

    /// Get a book by its remote path.
    pub fn get_book_by_source_path(&self, user_id: &str, path: &str) -> Result<Book> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM books WHERE user_id = ?1 AND source_path = ?2",
                BOOK_COLUMNS
            ),
            params![user_id, path],
            Self::row_to_book,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get book: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Book at {}", path)))
    }

    /// Flag books as missing. Unknown paths and books already missing are skipped.
    pub fn mark_books_missing(&self, user_id: &str, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let now = now_timestamp();
        let mut flagged = 0;
        {
            let mut stmt = tx
                .prepare(
                    "UPDATE books SET missing = 1, updated_at = ?1
                     WHERE user_id = ?2 AND source_path = ?3 AND missing = 0",
                )
                .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

            for path in paths {
                flagged += stmt
                    .execute(params![now, user_id, path])
                    .map_err(|e| AppError::Database(format!("Failed to mark missing: {}", e)))?;
            }
        }

        tx.commit()
            .map_err(|e| AppError::Database(format!("Failed to commit: {}", e)))?;

        Ok(flagged)
    }

    fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
        Ok(Book {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            format: row.get(4)?,
            source_path: row.get(5)?,
            connection_id: row.get(6)?,
            missing: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    // ========== TASK OPERATIONS ==========

    /// Persist a new task.
    pub fn create_task(&self, mut task: Task) -> Result<Task> {
        if task.id.is_empty() {
            task.id = uuid::Uuid::new_v4().to_string();
        }
        let now = now_timestamp();
        task.created_at = now;
        task.updated_at = now;

        let payload = serde_json::to_string(&task.payload)
            .map_err(|e| AppError::Internal(format!("Failed to encode payload: {}", e)))?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tasks (id, user_id, task_type, status, error, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.id,
                task.user_id,
                task.task_type,
                task.status.as_str(),
                task.error,
                payload,
                task.created_at,
                task.updated_at,
            ],
        )
        .map_err(|e| AppError::Database(format!("Failed to create task: {}", e)))?;

        Ok(task)
    }

    /// Persist a task's status and error.
    pub fn update_task(&self, task: &Task) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE tasks SET status = ?1, error = ?2, updated_at = ?3
                 WHERE user_id = ?4 AND id = ?5",
                params![
                    task.status.as_str(),
                    task.error,
                    now_timestamp(),
                    task.user_id,
                    task.id,
                ],
            )
            .map_err(|e| AppError::Database(format!("Failed to update task: {}", e)))?;

        if rows == 0 {
            return Err(AppError::NotFound(format!("Task {}", task.id)));
        }
        Ok(())
    }

    /// Get a task by ID.
    pub fn get_task(&self, user_id: &str, id: &str) -> Result<Task> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE user_id = ?1 AND id = ?2", TASK_COLUMNS),
            params![user_id, id],
            Self::row_to_task,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get task: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Task {}", id)))
    }

    /// List a user's tasks, newest first.
    pub fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
                TASK_COLUMNS
            ))
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let tasks = stmt
            .query_map(params![user_id], Self::row_to_task)
            .map_err(|e| AppError::Database(format!("Failed to list tasks: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect tasks: {}", e)))?;

        Ok(tasks)
    }

    fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
        let payload: String = row.get(5)?;
        let payload = serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

        Ok(Task {
            id: row.get(0)?,
            user_id: row.get(1)?,
            task_type: row.get(2)?,
            status: parse_column(row, 3)?,
            error: row.get(4)?,
            payload,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

/// Read a text column and parse it into an enum.
fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = AppError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: AppError| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
