use axum::{Router, routing::any};

use crate::{handlers, server::AppState};

/// Create the REST router. Every path is handed to the dispatcher.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", any(handlers::rest::root))
        .route("/{*path}", any(handlers::rest::dispatch))
}
