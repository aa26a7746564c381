//! # strata-server
//!
//! HTTP binding for the Strata engine: PostgREST-style routes over one
//! SQLite database, with row-level security enforced by the engine.

pub mod auth;
pub mod error;
pub mod response;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::AppState;

/// Build the router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/_strata/schema/invalidate", post(routes::invalidate_schema))
        .route(
            "/{table}",
            get(routes::read_rows)
                .post(routes::insert_rows)
                .patch(routes::update_rows)
                .delete(routes::delete_rows),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
