//! fup: ephemeral file sharing.
//!
//! Uploads pass a captcha, are stored under an unguessable identifier and
//! are deleted by a background sweeper once their time-to-live has passed.
//! A global quota bounds the bytes held at any time.

pub mod admission;
pub mod allocator;
pub mod blob;
pub mod captcha;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod sweeper;

use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Router};
use constants::DOWNLOAD_PREFIX;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use config::Config;
pub use state::AppState;
pub use store::{ObjectRecord, ObjectStore};
pub use sweeper::{Sweeper, SweeperHandle};

/// Application routes. Rate limiting is added by the binary since it needs
/// the peer address of a real connection.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.body_limit();
    let downloads = ServeDir::new(&state.config.storage_root);

    Router::new()
        .route("/", get(handlers::index))
        .route("/c/:image", get(handlers::captcha_challenge))
        .route("/api/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/api/captcha", get(handlers::new_captcha))
        .route("/api/upload", post(handlers::upload))
        .nest_service(DOWNLOAD_PREFIX, downloads)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", handlers::ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
