//! Storage interfaces injected into the sync engine.
//!
//! The engine only talks to these traits. [`Database`] implements all of them
//! on top of SQLite; tests and alternate deployments may supply their own.

use crate::db::{Book, Connection, Database, SyncStatus, Task};
use crate::error::Result;

/// Per-user WebDAV connection records.
pub trait ConnectionStore: Send + Sync {
    /// Persist a new connection for `user_id`, assigning its ID.
    fn create(&self, user_id: &str, conn: Connection) -> Result<Connection>;
    /// All connections of one user.
    fn list_by_user(&self, user_id: &str) -> Result<Vec<Connection>>;
    /// Every connection of every user.
    fn list_all(&self) -> Result<Vec<Connection>>;
    /// Fetch one connection.
    fn get_by_id(&self, user_id: &str, id: &str) -> Result<Connection>;
    /// Replace base URL, username and sealed secret. Sync status is untouched.
    fn update(&self, user_id: &str, conn: &Connection) -> Result<Connection>;
    /// Remove a connection.
    fn delete(&self, user_id: &str, id: &str) -> Result<()>;
    /// Record a sync outcome. Credentials are untouched.
    fn update_sync_status(
        &self,
        user_id: &str,
        id: &str,
        status: SyncStatus,
        error: &str,
    ) -> Result<Connection>;
}

/// The user's book catalog.
pub trait BookCatalog: Send + Sync {
    /// Insert or update the book keyed by `(user_id, book.source_path)`.
    fn upsert(&self, user_id: &str, book: Book) -> Result<Book>;
    /// All books of one user.
    fn list_by_user(&self, user_id: &str) -> Result<Vec<Book>>;
    /// Fetch one book by ID.
    fn get_by_id(&self, user_id: &str, id: &str) -> Result<Book>;
    /// Fetch one book by its remote path.
    fn get_by_source_path(&self, user_id: &str, path: &str) -> Result<Book>;
    /// Flag the given paths as missing. Returns the number of books flagged.
    fn mark_missing(&self, user_id: &str, paths: &[String]) -> Result<usize>;
}

/// Persisted task records.
pub trait TaskStore: Send + Sync {
    /// Persist a new task, assigning its ID and timestamps.
    fn create(&self, task: Task) -> Result<Task>;
    /// Persist status and error of an existing task.
    fn update(&self, task: &Task) -> Result<()>;
    /// Fetch one task.
    fn get(&self, user_id: &str, id: &str) -> Result<Task>;
    /// All tasks of one user, newest first.
    fn list_by_user(&self, user_id: &str) -> Result<Vec<Task>>;
}

impl ConnectionStore for Database {
    fn create(&self, user_id: &str, conn: Connection) -> Result<Connection> {
        self.create_connection(user_id, conn)
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<Connection>> {
        self.list_connections(user_id)
    }

    fn list_all(&self) -> Result<Vec<Connection>> {
        self.list_all_connections()
    }

    fn get_by_id(&self, user_id: &str, id: &str) -> Result<Connection> {
        self.get_connection(user_id, id)
    }

    fn update(&self, user_id: &str, conn: &Connection) -> Result<Connection> {
        self.update_connection(user_id, conn)
    }

    fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        self.delete_connection(user_id, id)
    }

    fn update_sync_status(
        &self,
        user_id: &str,
        id: &str,
        status: SyncStatus,
        error: &str,
    ) -> Result<Connection> {
        self.update_connection_status(user_id, id, status, error)
    }
}

impl BookCatalog for Database {
    fn upsert(&self, user_id: &str, book: Book) -> Result<Book> {
        self.upsert_book(user_id, &book)
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<Book>> {
        self.list_books(user_id)
    }

    fn get_by_id(&self, user_id: &str, id: &str) -> Result<Book> {
        self.get_book(user_id, id)
    }

    fn get_by_source_path(&self, user_id: &str, path: &str) -> Result<Book> {
        self.get_book_by_source_path(user_id, path)
    }

    fn mark_missing(&self, user_id: &str, paths: &[String]) -> Result<usize> {
        self.mark_books_missing(user_id, paths)
    }
}

impl TaskStore for Database {
    fn create(&self, task: Task) -> Result<Task> {
        self.create_task(task)
    }

    fn update(&self, task: &Task) -> Result<()> {
        self.update_task(task)
    }

    fn get(&self, user_id: &str, id: &str) -> Result<Task> {
        self.get_task(user_id, id)
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<Task>> {
        self.list_tasks(user_id)
    }
}
