//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let webdav_routes = Router::new()
        .route(
            "/",
            get(handlers::list_connections).post(handlers::create_connection),
        )
        .route(
            "/{id}",
            put(handlers::update_connection).delete(handlers::delete_connection),
        )
        .route("/{id}/sync", post(handlers::sync_connection));

    let book_routes = Router::new()
        .route("/", get(handlers::list_books))
        .route("/{id}/content", get(handlers::book_content));

    let task_routes = Router::new()
        .route("/", get(handlers::list_tasks))
        .route("/{id}", get(handlers::get_task))
        .route("/{id}/retry", post(handlers::retry_task));

    Router::new()
        .route("/api/health", get(handlers::health))
        .nest("/api/webdav", webdav_routes)
        .nest("/api/books", book_routes)
        .nest("/api/tasks", task_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
