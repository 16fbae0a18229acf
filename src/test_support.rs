//! Shared fixtures for unit tests.

use crate::{
    auth::{Authenticator, jwt::JwtValidator},
    db::run_migrations,
    services::{
        blob_store::ObjectStoreBlobs, file_repository::SqliteFileRepository,
        file_service::FileService,
    },
    state::AppState,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use object_store::memory::InMemory;
use serde_json::json;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;

pub const TEST_SECRET: &str = "test-signing-secret-with-enough-bytes";
pub const TEST_ISSUER: &str = "https://identity.test";
pub const TEST_AUDIENCE: &str = "boards_api";
pub const TEST_SCOPE: &str = "VLO_BOARDS";

/// Single-connection in-memory database with the schema applied.
///
/// Every connection to `sqlite::memory:` gets its own database, so the pool
/// must never open a second one.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

pub fn test_authenticator() -> Authenticator {
    Authenticator::new(
        JwtValidator::with_shared_secret(
            TEST_SECRET.as_bytes(),
            Some(TEST_ISSUER.into()),
            Some(TEST_AUDIENCE.into()),
        ),
        None,
        TEST_SCOPE.into(),
    )
}

pub async fn test_state() -> AppState {
    let db = memory_pool().await;
    let blobs = Arc::new(ObjectStoreBlobs::new(Arc::new(InMemory::new())));
    let files = FileService::new(Arc::new(SqliteFileRepository::new(db.clone())), blobs.clone());
    AppState {
        files,
        blobs,
        db,
        auth: Arc::new(test_authenticator()),
    }
}

/// Sign an `at+jwt` access token the test authenticator accepts.
pub fn access_token(sub: &str, scope: serde_json::Value) -> String {
    signed_token(json!({
        "sub": sub,
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "scope": scope,
        "exp": (Utc::now() + Duration::minutes(5)).timestamp(),
    }))
}

pub fn signed_token(claims: serde_json::Value) -> String {
    let mut header = Header::default();
    header.typ = Some("at+jwt".into());
    encode(&header, &claims, &EncodingKey::from_secret(TEST_SECRET.as_bytes())).unwrap()
}
