use axum::{middleware, Router};

use crate::{auth::middleware::require_auth, state::AppState};

pub mod avatar;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;

/// Profile and upload routes, all behind bearer authentication.
pub fn router(state: &AppState) -> Router<AppState> {
    handlers::profile_routes(state.config.uploads.max_bytes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
}
