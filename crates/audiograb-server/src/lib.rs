//! audiograb-server: HTTP front end for the conversion pipeline

pub mod error;
pub mod routes;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    routes::router()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
