//! # trove-http — the HTTP and WebSocket transport adapters
//!
//! Converts requests into `(methodId, params, auth)` calls on the shared
//! dispatcher and serializes the common envelope back. Includes the
//! URL-encoded and host-label compatibility layers, multipart event
//! uploads, signed attachment downloads, CORS, and the WebSocket session
//! adapter.

pub mod attachments;
pub mod auth;
pub mod compat;
pub mod envelope;
pub mod multipart;
pub mod routes;
pub mod state;
pub mod ws;

pub use routes::build_router;
pub use state::AppState;

use axum::http::HeaderName;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

/// CORS policy: echo the request origin (with credentials), reflect the
/// preflight method/header asks, and expose the API version header.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers([HeaderName::from_static("api-version")])
}
