//! Defines the HTTP routes of the media gateway.
//!
//! ## Structure
//! - `POST   /upload`            — multipart file upload
//! - `GET    /files`             — list complete catalog entries
//! - `GET    /read/{filename}`   — stream a file back (Range-aware)
//! - `DELETE /delete/{filename}` — delete a file by key
//! - `GET    /`                  — plain-text liveness
//! - `GET    /readyz`            — readiness probe
//!
//! `{filename}` is the generated object key, e.g.
//! `3f9c…a1.png` — the only external handle to a stored object.

use crate::{
    handlers::{
        health_handlers::{liveness, readyz},
        media_handlers::{delete_file, list_files, read_file, upload_file},
    },
    services::media_store::MediaStore,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};

/// Build and return the router for the whole HTTP surface.
///
/// The router carries shared state (`MediaStore`) to all handlers.
/// Uploads stream straight into the chunk store, so the default axum
/// body limit is lifted; CORS is wide open, as in the original gateway.
pub fn routes() -> Router<MediaStore> {
    Router::new()
        .route("/", get(liveness))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload_file))
        .route("/files", get(list_files))
        .route("/read/{filename}", get(read_file))
        .route("/delete/{filename}", delete(delete_file))
        .layer(DefaultBodyLimit::disable())
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
