//! Wiring of the sync service, the task queue and its running worker.

use crate::config::Config;
use crate::crypto::SecretKey;
use crate::db::Database;
use crate::error::Result;
use crate::formats::ExtensionDetector;
use crate::sync::SyncService;
use crate::tasks::{FormatTaskHandler, TaskQueue};
use crate::webdav::{HttpClient, WebDavClient};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A sync service whose task worker is already draining the queue.
pub struct Engine {
    /// Backing store.
    pub db: Arc<Database>,
    /// Connection management and sync.
    pub sync: Arc<SyncService>,
    /// Producer side of the task queue.
    pub queue: TaskQueue,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl Engine {
    /// Open the database named in `config` and start the engine.
    pub fn build(config: &Config) -> Result<Self> {
        let db = Arc::new(Database::open(&config.database.path)?);
        let key = config.webdav.secret_key()?;
        let client = Arc::new(HttpClient::new(config.webdav.request_timeout())?);
        Ok(Self::start(db, client, key, config.tasks.buffer))
    }

    /// Wire the collaborators and spawn the task worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        db: Arc<Database>,
        client: Arc<dyn WebDavClient>,
        key: SecretKey,
        buffer: usize,
    ) -> Self {
        let handler = Arc::new(FormatTaskHandler::new(db.clone()));
        let (queue, worker) = TaskQueue::new(db.clone(), handler, buffer);

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(worker.run(cancel.clone()));

        let sync = Arc::new(SyncService::new(
            db.clone(),
            client,
            key,
            db.clone(),
            Arc::new(ExtensionDetector),
            Some(queue.clone()),
        ));

        Self {
            db,
            sync,
            queue,
            cancel,
            worker,
        }
    }

    /// Token that stops the worker and anything else tied to this engine.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Let the worker finish every queued task, then wait for it to exit.
    ///
    /// The worker only exits once all clones of the queue and service are dropped.
    pub async fn finish(self) {
        let Engine {
            sync,
            queue,
            worker,
            ..
        } = self;
        drop(sync);
        drop(queue);
        join(worker).await;
    }

    /// Stop the worker without draining the queue.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        join(self.worker).await;
    }
}

async fn join(worker: JoinHandle<()>) {
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Task worker failed");
    }
}
