//! Defines the HTTP surface of the service.
//!
//! ## Structure
//! - **Probes** (no authentication)
//!   - `GET  /healthz`: liveness
//!   - `GET  /readyz`: database and object store reachability
//!
//! - **File endpoints** (bearer token with the required scope)
//!   - `POST /UploadFile`: multipart upload, responds with the object id
//!   - `POST /GetFile?id=<objectId>`: download as an attachment

use crate::{
    auth::middleware::auth_middleware,
    handlers::{
        file_handlers::{get_file, upload_file},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router with state already applied.
///
/// `max_upload_bytes` caps the request body of the file endpoints.
pub fn routes(state: AppState, max_upload_bytes: usize) -> Router {
    let files = Router::new()
        .route("/UploadFile", post(upload_file))
        .route("/GetFile", post(get_file))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
