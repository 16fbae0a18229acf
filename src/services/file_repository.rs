//! Metadata store for file records.

use crate::models::file::FileRecord;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("file `{0}` already exists")]
    Duplicate(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn insert(&self, record: &FileRecord) -> RepositoryResult<()>;

    async fn find_by_object_id(&self, object_id: &str) -> RepositoryResult<Option<FileRecord>>;
}

/// [`FileRepository`] backed by the `files` table in SQLite.
#[derive(Clone)]
pub struct SqliteFileRepository {
    db: Arc<SqlitePool>,
}

impl SqliteFileRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn insert(&self, record: &FileRecord) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO files (
                object_id, owner_id, file_name, content_type, is_public,
                size_bytes, etag, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.object_id)
        .bind(&record.owner_id)
        .bind(&record.file_name)
        .bind(&record.content_type)
        .bind(record.is_public)
        .bind(record.size_bytes)
        .bind(&record.etag)
        .bind(record.created_at)
        .execute(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::Duplicate(record.object_id.clone())
            } else {
                RepositoryError::Sqlx(err)
            }
        })?;
        Ok(())
    }

    async fn find_by_object_id(&self, object_id: &str) -> RepositoryResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT object_id, owner_id, file_name, content_type, is_public,
                    size_bytes, etag, created_at
             FROM files WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;
    use chrono::{TimeZone, Utc};

    fn sample(object_id: &str) -> FileRecord {
        FileRecord {
            object_id: object_id.into(),
            owner_id: "alice".into(),
            file_name: "report.pdf".into(),
            content_type: "application/pdf".into(),
            is_public: false,
            size_bytes: 1024,
            etag: "0cc175b9c0f1b6a831c399e269772661".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let repo = SqliteFileRepository::new(memory_pool().await);
        let record = sample("a1");
        repo.insert(&record).await.unwrap();

        let found = repo.find_by_object_id("a1").await.unwrap();
        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let repo = SqliteFileRepository::new(memory_pool().await);
        assert_eq!(repo.find_by_object_id("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_object_id_is_rejected() {
        let repo = SqliteFileRepository::new(memory_pool().await);
        repo.insert(&sample("dup")).await.unwrap();

        let err = repo.insert(&sample("dup")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(id) if id == "dup"));
    }
}
