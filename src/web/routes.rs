use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::static_files::static_handler;
use super::state::AppState;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

// UI Routes - dashboard page and its assets
pub fn ui_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::ui::index_handler))
        .route("/static/{*path}", get(static_handler))
}

// API Routes - JSON API driven by the dashboard
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Spreadsheets
            .route("/template", get(handlers::api::download_template))
            .route(
                "/upload",
                post(handlers::api::upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
            )
            // Source rows
            .route("/rows", get(handlers::api::list_rows))
            .route("/rows/load", post(handlers::api::load_rows))
            .route("/rows/save", post(handlers::api::save_rows))
            // Endpoint calls
            .route("/convert", post(handlers::api::convert))
            .route("/verify", post(handlers::api::verify))
            .route("/preview", post(handlers::api::preview))
            // System status
            .route("/progress", get(handlers::api::progress))
            .route("/status", get(handlers::api::system_status)),
    )
}
