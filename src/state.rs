//! Shared application state handed to every handler.

use crate::{
    auth::Authenticator,
    services::{blob_store::BlobStore, file_service::FileService},
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    /// Used directly only by the readiness probe.
    pub blobs: Arc<dyn BlobStore>,
    pub db: Arc<SqlitePool>,
    pub auth: Arc<Authenticator>,
}
