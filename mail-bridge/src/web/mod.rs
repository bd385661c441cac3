//! HTTP surface.
//!
//! The mailer only exposes a liveness probe. The API side adds the enqueue
//! endpoints and read-only listings of the record store.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    health, list_emails, list_files, send_mail, upload_csv, ApiResponse, AppState,
    SendMailRequest, UploadCsvRequest,
};

/// Router for the mailer: `GET /` only.
pub fn health_router() -> Router {
    Router::new()
        .route("/", get(health))
        .layer(TraceLayer::new_for_http())
}

/// Router for the API side.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/emails", get(list_emails))
        .route("/emails/send_mail", post(send_mail))
        .route("/files", get(list_files))
        .route("/files/upload_csv", post(upload_csv))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
