//! Amber Cache HTTP surface
//!
//! Routes, the blob GET/HEAD contract, upload/delete, the status page, and
//! the error-to-status mapping.

pub mod error;
pub mod guard;
pub mod headers;
pub mod range;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::Router;
use axum::routing::{get, put};

/// Build the public router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(routes::stats::index)
                .options(routes::preflight)
                .fallback(routes::method_not_allowed),
        )
        .route(
            "/upload",
            put(routes::upload::upload)
                .options(routes::preflight)
                .fallback(routes::method_not_allowed),
        )
        .route(
            "/{blob}",
            get(routes::blob::get_or_head)
                .head(routes::blob::get_or_head)
                .delete(routes::upload::delete_blob)
                .options(routes::preflight)
                .fallback(routes::method_not_allowed),
        )
        .fallback(routes::fallback)
        .with_state(state)
}
