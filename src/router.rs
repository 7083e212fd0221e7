use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

/// API routes shared by the binary and the integration tests. Middleware
/// (metrics, CORS) is layered on in `main`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Auth routes
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        // Link routes (protected)
        .route(
            "/api/v1/links",
            post(handlers::links::create_link).get(handlers::links::list_links),
        )
        .route(
            "/api/v1/links/:id",
            get(handlers::links::get_link).delete(handlers::links::delete_link),
        )
        // Tag routes (protected)
        .route(
            "/api/v1/links/:id/tags",
            post(handlers::tags::update_link_tags),
        )
        .route("/api/v1/tags", get(handlers::tags::list_tags))
        .with_state(state)
}
