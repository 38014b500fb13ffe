//! HTTP request handlers.

use crate::db::{self, Book, Connection, SyncStatus, Task};
use crate::error::Result;
use crate::server::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

// ============================================================================
// HEALTH
// ============================================================================

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Liveness probe. Does not require a token.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// WEBDAV CONNECTIONS
// ============================================================================

/// Create or update request.
#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    secret: String,
}

/// Connection as returned by the API. Never carries the secret.
#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    id: String,
    base_url: String,
    username: String,
    last_sync_status: SyncStatus,
    last_error: String,
    last_sync_at: String,
}

impl From<Connection> for ConnectionResponse {
    fn from(conn: Connection) -> Self {
        Self {
            id: conn.id,
            base_url: conn.base_url,
            username: conn.username,
            last_sync_status: conn.last_sync_status,
            last_error: conn.last_error,
            last_sync_at: conn
                .last_sync_at
                .map(|ts| db::timestamp_to_datetime(ts).to_rfc3339())
                .unwrap_or_default(),
        }
    }
}

/// List the caller's connections.
pub async fn list_connections(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConnectionResponse>>> {
    let user_id = state.user_id(&headers)?;
    let conns = state.sync.list(&user_id)?;
    Ok(Json(conns.into_iter().map(Into::into).collect()))
}

/// Register a connection.
pub async fn create_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionResponse>)> {
    let user_id = state.user_id(&headers)?;
    let conn = state
        .sync
        .create(&user_id, &req.base_url, &req.username, &req.secret)
        .await?;
    Ok((StatusCode::CREATED, Json(conn.into())))
}

/// Replace a connection's credentials.
pub async fn update_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<ConnectionResponse>> {
    let user_id = state.user_id(&headers)?;
    let conn = state
        .sync
        .update(&user_id, &id, &req.base_url, &req.username, &req.secret)
        .await?;
    Ok(Json(conn.into()))
}

/// Remove a connection.
pub async fn delete_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user_id = state.user_id(&headers)?;
    state.sync.delete(&user_id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sync one connection now.
///
/// Always answers 202; the outcome is recorded on the connection.
pub async fn sync_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user_id = state.user_id(&headers)?;
    if let Err(e) = state.sync.sync(&user_id, &id).await {
        tracing::warn!(user_id = %user_id, connection_id = %id, "Manual sync failed: {}", e);
    }
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// BOOKS
// ============================================================================

/// Book as returned by the API.
#[derive(Debug, Serialize)]
pub struct BookResponse {
    id: String,
    title: String,
    author: String,
    format: String,
    source_path: String,
    connection_id: String,
    missing: bool,
    updated_at: String,
}

impl From<Book> for BookResponse {
    fn from(book: Book) -> Self {
        Self {
            id: book.id,
            title: book.title,
            author: book.author,
            format: book.format,
            source_path: book.source_path,
            connection_id: book.connection_id,
            missing: book.missing,
            updated_at: db::timestamp_to_datetime(book.updated_at).to_rfc3339(),
        }
    }
}

/// List the caller's books.
pub async fn list_books(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<BookResponse>>> {
    let user_id = state.user_id(&headers)?;
    let books = state.catalog.list_by_user(&user_id)?;
    Ok(Json(books.into_iter().map(Into::into).collect()))
}

/// Stream a book's file from its WebDAV server.
pub async fn book_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    let user_id = state.user_id(&headers)?;
    let content = state.sync.open_content(&user_id, &id).await?;

    Ok((
        [(header::CONTENT_TYPE, content.content_type)],
        Body::from_stream(content.stream),
    )
        .into_response())
}

// ============================================================================
// TASKS
// ============================================================================

/// List the caller's tasks.
pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>> {
    let user_id = state.user_id(&headers)?;
    Ok(Json(state.queue.list(&user_id)?))
}

/// Fetch one task.
pub async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Task>> {
    let user_id = state.user_id(&headers)?;
    Ok(Json(state.queue.get(&user_id, &id)?))
}

/// Enqueue a copy of a task.
pub async fn retry_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Task>)> {
    let user_id = state.user_id(&headers)?;
    let task = state.queue.retry(&user_id, &id).await?;
    Ok((StatusCode::CREATED, Json(task)))
}
