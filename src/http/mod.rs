use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::AppState;

mod error;
mod handlers;
mod routes;

pub use error::AppError;

/// Room for multipart boundaries and part headers on top of the image itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.upload_max_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .merge(routes::health())
        .nest("/v1", routes::images())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}
