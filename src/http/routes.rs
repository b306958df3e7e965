use axum::{routing::get, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn images() -> Router<AppState> {
    Router::new()
        .route("/images", post(handlers::upload_image))
        .route("/images/:id", get(handlers::get_image))
        .route("/images/:id/republish", post(handlers::republish_image))
}
