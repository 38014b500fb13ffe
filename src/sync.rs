//! Connection management and catalog reconciliation.

use crate::crypto::{self, SecretKey};
use crate::db::{Book, Connection, SyncStatus};
use crate::error::{AppError, Result};
use crate::formats::{self, FormatDetector};
use crate::scheduler::Syncer;
use crate::store::{BookCatalog, ConnectionStore};
use crate::tasks::{FORMAT_TASK, TaskQueue};
use crate::webdav::{Content, Entry, WebDavClient};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Status text recorded when a stored secret cannot be decrypted.
const DECRYPT_FAILED: &str = "decrypt failed";

/// Status text recorded when the remote listing fails.
const SYNC_FAILED: &str = "sync failed";

/// Counts from one connection sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Files returned by the remote listing.
    pub discovered: usize,
    /// Books inserted or refreshed.
    pub upserted: usize,
    /// Books newly flagged as missing.
    pub marked_missing: usize,
    /// Format tasks enqueued.
    pub enqueued: usize,
}

/// Coordinates the connection store, WebDAV client, catalog and task queue.
pub struct SyncService {
    connections: Arc<dyn ConnectionStore>,
    client: Arc<dyn WebDavClient>,
    key: SecretKey,
    catalog: Arc<dyn BookCatalog>,
    detector: Arc<dyn FormatDetector>,
    queue: Option<TaskQueue>,
}

impl SyncService {
    /// Create a service from its collaborators.
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        client: Arc<dyn WebDavClient>,
        key: SecretKey,
        catalog: Arc<dyn BookCatalog>,
        detector: Arc<dyn FormatDetector>,
        queue: Option<TaskQueue>,
    ) -> Self {
        Self {
            connections,
            client,
            key,
            catalog,
            detector,
            queue,
        }
    }

    /// Register a connection after checking the server accepts the credentials.
    pub async fn create(
        &self,
        user_id: &str,
        base_url: &str,
        username: &str,
        secret: &str,
    ) -> Result<Connection> {
        validate(base_url, username, secret)?;
        self.client.list(base_url, username, secret).await?;
        let encrypted_secret = crypto::encrypt_secret(&self.key, secret)?;

        let conn = self.connections.create(
            user_id,
            Connection {
                id: String::new(),
                user_id: user_id.to_string(),
                base_url: base_url.to_string(),
                username: username.to_string(),
                encrypted_secret,
                last_sync_status: SyncStatus::Never,
                last_error: String::new(),
                last_sync_at: None,
            },
        )?;

        tracing::info!(user_id, connection_id = %conn.id, base_url, "Connection created");
        Ok(conn)
    }

    /// All connections of one user.
    pub fn list(&self, user_id: &str) -> Result<Vec<Connection>> {
        self.connections.list_by_user(user_id)
    }

    /// Replace the credentials of an existing connection.
    pub async fn update(
        &self,
        user_id: &str,
        id: &str,
        base_url: &str,
        username: &str,
        secret: &str,
    ) -> Result<Connection> {
        validate(base_url, username, secret)?;
        self.client.list(base_url, username, secret).await?;
        let encrypted_secret = crypto::encrypt_secret(&self.key, secret)?;

        let mut conn = self.connections.get_by_id(user_id, id)?;
        conn.base_url = base_url.to_string();
        conn.username = username.to_string();
        conn.encrypted_secret = encrypted_secret;

        let conn = self.connections.update(user_id, &conn)?;
        tracing::info!(user_id, connection_id = %conn.id, "Connection updated");
        Ok(conn)
    }

    /// Remove a connection. Its books stay in the catalog.
    pub fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        self.connections.delete(user_id, id)?;
        tracing::info!(user_id, connection_id = id, "Connection deleted");
        Ok(())
    }

    /// Reconcile the catalog with the current remote listing.
    pub async fn sync(&self, user_id: &str, id: &str) -> Result<SyncReport> {
        let started = std::time::Instant::now();
        let conn = self.connections.get_by_id(user_id, id)?;

        let secret = match crypto::decrypt_secret(&self.key, &conn.encrypted_secret) {
            Ok(secret) => secret,
            Err(e) => {
                self.record_failure(user_id, id, DECRYPT_FAILED);
                return Err(e);
            }
        };

        let entries = match self
            .client
            .list(&conn.base_url, &conn.username, &secret)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                self.record_failure(user_id, id, SYNC_FAILED);
                return Err(e);
            }
        };

        let mut report = SyncReport {
            discovered: entries.len(),
            ..Default::default()
        };
        let mut present = HashSet::with_capacity(entries.len());

        for entry in &entries {
            present.insert(entry.path.as_str());
            match self.import_entry(user_id, id, entry).await {
                Ok(enqueued) => {
                    report.upserted += 1;
                    if enqueued {
                        report.enqueued += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(user_id, connection_id = id, path = %entry.path, "Failed to import entry: {}", e);
                }
            }
        }

        report.marked_missing = match self.mark_absent(user_id, &present) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(user_id, connection_id = id, "Failed to mark missing books: {}", e);
                0
            }
        };

        self.connections
            .update_sync_status(user_id, id, SyncStatus::Success, "")?;

        tracing::info!(
            user_id,
            connection_id = id,
            discovered = report.discovered,
            upserted = report.upserted,
            marked_missing = report.marked_missing,
            enqueued = report.enqueued,
            elapsed = ?started.elapsed(),
            "Sync complete"
        );
        Ok(report)
    }

    /// Sync every connection of every user.
    ///
    /// Keeps going past failures and returns the last error seen.
    pub async fn sync_all(&self) -> Result<()> {
        let conns = self.connections.list_all()?;
        let mut last_err = None;

        for conn in &conns {
            if let Err(e) = self.sync(&conn.user_id, &conn.id).await {
                tracing::warn!(user_id = %conn.user_id, connection_id = %conn.id, "Sync failed: {}", e);
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stream a book's file from the server it was found on.
    pub async fn open_content(&self, user_id: &str, book_id: &str) -> Result<Content> {
        let book = self.catalog.get_by_id(user_id, book_id)?;
        if book.connection_id.is_empty() {
            return Err(AppError::NotFound(format!(
                "Connection for book {}",
                book_id
            )));
        }

        let conn = self.connections.get_by_id(user_id, &book.connection_id)?;
        let secret = crypto::decrypt_secret(&self.key, &conn.encrypted_secret)?;

        self.client
            .fetch(&conn.base_url, &conn.username, &secret, &book.source_path)
            .await
    }

    /// Upsert one remote file and enqueue its format task.
    /// Returns whether a task was enqueued.
    async fn import_entry(&self, user_id: &str, connection_id: &str, entry: &Entry) -> Result<bool> {
        let format = self
            .detector
            .detect(&entry.path)
            .or_else(|| formats::extension(&entry.path))
            .unwrap_or_default();

        let book = self.catalog.upsert(
            user_id,
            Book::discovered(
                &entry.path,
                formats::title_from_path(&entry.path),
                &format,
                connection_id,
            ),
        )?;

        let Some(queue) = &self.queue else {
            return Ok(false);
        };

        let payload = BTreeMap::from([
            ("book_id".to_string(), book.id),
            ("format".to_string(), format),
            ("source_path".to_string(), entry.path.clone()),
        ]);
        if let Err(e) = queue.enqueue(user_id, FORMAT_TASK, payload).await {
            tracing::warn!(user_id, path = %entry.path, "Failed to enqueue format task: {}", e);
            return Ok(false);
        }
        Ok(true)
    }

    /// Flag every book of the user that the latest listing did not return.
    fn mark_absent(&self, user_id: &str, present: &HashSet<&str>) -> Result<usize> {
        let absent: Vec<String> = self
            .catalog
            .list_by_user(user_id)?
            .into_iter()
            .filter(|b| !b.missing && !present.contains(b.source_path.as_str()))
            .map(|b| b.source_path)
            .collect();

        if absent.is_empty() {
            return Ok(0);
        }
        self.catalog.mark_missing(user_id, &absent)
    }

    fn record_failure(&self, user_id: &str, id: &str, message: &str) {
        if let Err(e) = self
            .connections
            .update_sync_status(user_id, id, SyncStatus::Error, message)
        {
            tracing::error!(user_id, connection_id = id, "Failed to record sync status: {}", e);
        }
    }
}

#[async_trait]
impl Syncer for SyncService {
    async fn sync_all(&self) -> Result<()> {
        SyncService::sync_all(self).await
    }
}

fn validate(base_url: &str, username: &str, secret: &str) -> Result<()> {
    for (field, value) in [("base_url", base_url), ("username", username), ("secret", secret)] {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{} is required", field)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, TaskStatus};
    use crate::formats::ExtensionDetector;
    use crate::store::TaskStore;
    use crate::tasks::{TaskHandler, TaskWorker};
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    /// Scripted WebDAV server keyed by base URL.
    #[derive(Default)]
    struct FakeClient {
        listings: Mutex<HashMap<String, Vec<String>>>,
        files: HashMap<String, Vec<u8>>,
        list_calls: AtomicUsize,
    }

    impl FakeClient {
        fn set(&self, base_url: &str, paths: &[&str]) {
            self.listings.lock().insert(
                base_url.to_string(),
                paths.iter().map(|p| p.to_string()).collect(),
            );
        }

        fn remove(&self, base_url: &str) {
            self.listings.lock().remove(base_url);
        }
    }

    #[async_trait]
    impl WebDavClient for FakeClient {
        async fn list(&self, base_url: &str, _username: &str, secret: &str) -> Result<Vec<Entry>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if secret == "wrong" {
                return Err(AppError::RemoteStatus {
                    status: 401,
                    url: base_url.to_string(),
                });
            }
            let listings = self.listings.lock();
            let paths = listings
                .get(base_url)
                .ok_or_else(|| AppError::Connectivity(format!("{} unreachable", base_url)))?;
            Ok(paths
                .iter()
                .map(|p| Entry {
                    path: p.clone(),
                    size: 1,
                    mod_time: None,
                })
                .collect())
        }

        async fn fetch(
            &self,
            _base_url: &str,
            _username: &str,
            _secret: &str,
            path: &str,
        ) -> Result<Content> {
            let body = self
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| AppError::NotFound(path.to_string()))?;
            Ok(Content {
                stream: Box::pin(futures::stream::once(async move {
                    Ok::<_, std::io::Error>(bytes::Bytes::from(body))
                })),
                content_type: "application/epub+zip".to_string(),
            })
        }
    }

    struct Harness {
        db: Arc<Database>,
        client: Arc<FakeClient>,
        service: SyncService,
    }

    fn harness_with(client: FakeClient, queue: Option<TaskQueue>) -> Harness {
        let db = Arc::new(Database::open_memory().unwrap());
        let client = Arc::new(client);
        let service = SyncService::new(
            db.clone(),
            client.clone(),
            crypto::parse_key(KEY).unwrap(),
            db.clone(),
            Arc::new(ExtensionDetector),
            queue,
        );
        Harness { db, client, service }
    }

    fn harness() -> Harness {
        harness_with(FakeClient::default(), None)
    }

    fn live_paths(db: &Database, user_id: &str) -> Vec<String> {
        let mut paths: Vec<String> = db
            .list_books(user_id)
            .unwrap()
            .into_iter()
            .filter(|b| !b.missing)
            .map(|b| b.source_path)
            .collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_create_validates_and_probes() {
        let h = harness();
        h.client.set("https://dav.example.com", &[]);

        let err = h
            .service
            .create("user-1", "", "alice", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.client.list_calls.load(Ordering::SeqCst), 0);

        let err = h
            .service
            .create("user-1", "https://dav.example.com", "alice", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteStatus { status: 401, .. }));
        assert!(h.service.list("user-1").unwrap().is_empty());

        let conn = h
            .service
            .create("user-1", "https://dav.example.com", "alice", "super-secret")
            .await
            .unwrap();
        assert_eq!(conn.last_sync_status, SyncStatus::Never);
        assert_ne!(conn.encrypted_secret, b"super-secret".to_vec());
        assert_eq!(
            crypto::decrypt_secret(&crypto::parse_key(KEY).unwrap(), &conn.encrypted_secret)
                .unwrap(),
            "super-secret"
        );
        assert_eq!(h.service.list("user-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_probe_failure_leaves_connection() {
        let h = harness();
        h.client.set("https://a.example.com", &[]);
        let conn = h
            .service
            .create("user-1", "https://a.example.com", "alice", "pw")
            .await
            .unwrap();

        let err = h
            .service
            .update("user-1", &conn.id, "https://b.example.com", "bob", "pw2")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Connectivity(_)));
        let stored = h.db.get_connection("user-1", &conn.id).unwrap();
        assert_eq!(stored.base_url, "https://a.example.com");

        h.client.set("https://b.example.com", &[]);
        let updated = h
            .service
            .update("user-1", &conn.id, "https://b.example.com", "bob", "pw2")
            .await
            .unwrap();
        assert_eq!(updated.base_url, "https://b.example.com");
        assert_eq!(updated.username, "bob");

        assert!(matches!(
            h.service
                .update("user-1", "missing", "https://b.example.com", "bob", "pw2")
                .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_reconciles_catalog() {
        let h = harness();
        let base = "https://dav.example.com";
        h.client.set(base, &["/OLD.txt"]);
        let conn = h.service.create("user-1", base, "alice", "pw").await.unwrap();

        let report = h.service.sync("user-1", &conn.id).await.unwrap();
        assert_eq!(report.upserted, 1);
        let old = h.db.get_book_by_source_path("user-1", "/OLD.txt").unwrap();

        h.client.set(base, &["/A.epub", "/B.pdf"]);
        let report = h.service.sync("user-1", &conn.id).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                discovered: 2,
                upserted: 2,
                marked_missing: 1,
                enqueued: 0,
            }
        );

        let old_after = h.db.get_book_by_source_path("user-1", "/OLD.txt").unwrap();
        assert_eq!(old_after.id, old.id);
        assert!(old_after.missing);

        let a = h.db.get_book_by_source_path("user-1", "/A.epub").unwrap();
        assert_eq!(a.title, "A");
        assert_eq!(a.format, "epub");
        assert_eq!(a.connection_id, conn.id);
        assert_eq!(live_paths(&h.db, "user-1"), vec!["/A.epub", "/B.pdf"]);

        let conn = h.db.get_connection("user-1", &conn.id).unwrap();
        assert_eq!(conn.last_sync_status, SyncStatus::Success);
        assert_eq!(conn.last_error, "");
        assert!(conn.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let h = harness();
        let base = "https://dav.example.com";
        h.client.set(base, &["/a.epub", "/notes/readme.xyz"]);
        let conn = h.service.create("user-1", base, "alice", "pw").await.unwrap();

        h.service.sync("user-1", &conn.id).await.unwrap();
        let first = h.db.list_books("user-1").unwrap();
        let report = h.service.sync("user-1", &conn.id).await.unwrap();
        let second = h.db.list_books("user-1").unwrap();

        assert_eq!(report.marked_missing, 0);
        assert_eq!(first.len(), second.len());
        assert_eq!(live_paths(&h.db, "user-1").len(), 2);

        // Unknown extensions fall back to the raw extension.
        let other = h
            .db
            .get_book_by_source_path("user-1", "/notes/readme.xyz")
            .unwrap();
        assert_eq!(other.format, "xyz");
    }

    #[tokio::test]
    async fn test_missing_book_reappears() {
        let h = harness();
        let base = "https://dav.example.com";
        h.client.set(base, &["/a.epub"]);
        let conn = h.service.create("user-1", base, "alice", "pw").await.unwrap();
        h.service.sync("user-1", &conn.id).await.unwrap();

        h.client.set(base, &[]);
        h.service.sync("user-1", &conn.id).await.unwrap();
        assert!(h.db.get_book_by_source_path("user-1", "/a.epub").unwrap().missing);

        h.client.set(base, &["/a.epub"]);
        h.service.sync("user-1", &conn.id).await.unwrap();
        assert!(!h.db.get_book_by_source_path("user-1", "/a.epub").unwrap().missing);
    }

    #[tokio::test]
    async fn test_sync_list_failure_records_status() {
        let h = harness();
        let base = "https://dav.example.com";
        h.client.set(base, &["/a.epub"]);
        let conn = h.service.create("user-1", base, "alice", "pw").await.unwrap();
        h.service.sync("user-1", &conn.id).await.unwrap();

        h.client.remove(base);
        let err = h.service.sync("user-1", &conn.id).await.unwrap_err();
        assert!(matches!(err, AppError::Connectivity(_)));

        let stored = h.db.get_connection("user-1", &conn.id).unwrap();
        assert_eq!(stored.last_sync_status, SyncStatus::Error);
        assert_eq!(stored.last_error, "sync failed");
        // Nothing is flagged missing on a failed listing.
        assert!(!h.db.get_book_by_source_path("user-1", "/a.epub").unwrap().missing);
    }

    #[tokio::test]
    async fn test_sync_decrypt_failure_records_status() {
        let h = harness();
        let base = "https://dav.example.com";
        h.client.set(base, &[]);
        let mut conn = h.service.create("user-1", base, "alice", "pw").await.unwrap();

        conn.encrypted_secret = vec![0u8; 4];
        h.db.update_connection("user-1", &conn).unwrap();

        let err = h.service.sync("user-1", &conn.id).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooShort));
        let stored = h.db.get_connection("user-1", &conn.id).unwrap();
        assert_eq!(stored.last_sync_status, SyncStatus::Error);
        assert_eq!(stored.last_error, "decrypt failed");
    }

    #[tokio::test]
    async fn test_sync_unknown_connection() {
        let h = harness();
        assert!(matches!(
            h.service.sync("user-1", "nope").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_enqueues_format_tasks() {
        struct Noop;

        #[async_trait]
        impl TaskHandler for Noop {
            async fn handle(&self, _task: &crate::db::Task) -> Result<()> {
                Ok(())
            }
        }

        let tasks: Arc<dyn TaskStore> = Arc::new(Database::open_memory().unwrap());
        let (queue, _worker): (TaskQueue, TaskWorker) =
            TaskQueue::new(tasks, Arc::new(Noop), 16);
        let h = harness_with(FakeClient::default(), Some(queue.clone()));

        let base = "https://dav.example.com";
        h.client.set(base, &["/A.epub", "/B.pdf"]);
        let conn = h.service.create("user-1", base, "alice", "pw").await.unwrap();

        let report = h.service.sync("user-1", &conn.id).await.unwrap();
        assert_eq!(report.enqueued, 2);
        h.service.sync("user-1", &conn.id).await.unwrap();

        // One task per entry per sync, unconditionally.
        let listed = queue.list("user-1").unwrap();
        assert_eq!(listed.len(), 4);
        let task = listed
            .iter()
            .find(|t| t.payload.get("source_path").map(String::as_str) == Some("/A.epub"))
            .unwrap();
        assert_eq!(task.task_type, "format");
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.payload.get("format").unwrap(), "epub");
        let book = h.db.get_book_by_source_path("user-1", "/A.epub").unwrap();
        assert_eq!(task.payload.get("book_id").unwrap(), &book.id);
    }

    #[tokio::test]
    async fn test_sync_all_continues_past_failures() {
        let h = harness();
        h.client.set("https://a.example.com", &["/a.epub"]);
        h.client.set("https://b.example.com", &["/b.epub"]);
        let a = h
            .service
            .create("user-1", "https://a.example.com", "alice", "pw")
            .await
            .unwrap();
        let b = h
            .service
            .create("user-2", "https://b.example.com", "bob", "pw")
            .await
            .unwrap();

        h.client.remove("https://a.example.com");
        let err = h.service.sync_all().await.unwrap_err();
        assert!(matches!(err, AppError::Connectivity(_)));

        assert_eq!(
            h.db.get_connection("user-1", &a.id).unwrap().last_sync_status,
            SyncStatus::Error
        );
        assert_eq!(
            h.db.get_connection("user-2", &b.id).unwrap().last_sync_status,
            SyncStatus::Success
        );
        assert_eq!(live_paths(&h.db, "user-2"), vec!["/b.epub"]);

        h.client.set("https://a.example.com", &["/a.epub"]);
        assert!(Syncer::sync_all(&h.service).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_content() {
        let mut client = FakeClient::default();
        client
            .files
            .insert("/A.epub".to_string(), b"epub-bytes".to_vec());
        let h = harness_with(client, None);

        let base = "https://dav.example.com";
        h.client.set(base, &["/A.epub"]);
        let conn = h.service.create("user-1", base, "alice", "pw").await.unwrap();
        h.service.sync("user-1", &conn.id).await.unwrap();
        let book = h.db.get_book_by_source_path("user-1", "/A.epub").unwrap();

        let content = h.service.open_content("user-1", &book.id).await.unwrap();
        assert_eq!(content.content_type, "application/epub+zip");
        let chunks: Vec<_> = content.stream.collect().await;
        let body: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();
        assert_eq!(body, b"epub-bytes");

        assert!(matches!(
            h.service.open_content("user-2", &book.id).await,
            Err(AppError::NotFound(_))
        ));

        let orphan = h
            .db
            .upsert_book("user-1", &Book::discovered("/x.epub", "x", "epub", ""))
            .unwrap();
        assert!(matches!(
            h.service.open_content("user-1", &orphan.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let h = harness();
        h.client.set("https://dav.example.com", &[]);
        let conn = h
            .service
            .create("user-1", "https://dav.example.com", "alice", "pw")
            .await
            .unwrap();

        h.service.delete("user-1", &conn.id).unwrap();
        assert!(h.service.list("user-1").unwrap().is_empty());
        assert!(matches!(
            h.service.delete("user-1", &conn.id),
            Err(AppError::NotFound(_))
        ));
    }
}
