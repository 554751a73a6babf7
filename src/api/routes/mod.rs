//! Route composition.

pub mod health;
pub mod jobs;
pub mod ws;

use axum::Router;

use crate::api::server::AppState;

/// Assemble the versioned API router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/jobs", jobs::router())
        .merge(ws::router())
        .merge(health::router());

    Router::new().nest("/api/v1", api).with_state(state)
}
