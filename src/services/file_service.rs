//! FileService: upload and access-controlled download of file attachments.
//! Payload bytes go to a [`BlobStore`], metadata to a [`FileRepository`].
//!
//! Ordering is the whole contract here:
//! - upload writes the blob first ([`FileService::store_blob`]) and only then
//!   inserts the record ([`FileService::record`]);
//! - download finds the record, applies the access policy, and only then
//!   opens the blob.

use crate::{
    models::{file::FileRecord, subject::Subject},
    services::{
        access_policy::may_view,
        blob_store::{BlobError, BlobStore, BlobStream},
        file_repository::{FileRepository, RepositoryError},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("not allowed to view file `{0}`")]
    Unauthorized(String),
    #[error("failed reading upload body: {0}")]
    Body(#[source] io::Error),
    #[error("object store failure: {0}")]
    Storage(#[from] BlobError),
    #[error("metadata store failure: {0}")]
    Persistence(#[from] RepositoryError),
}

pub type FileResult<T> = Result<T, FileError>;

/// What the caller supplies alongside the upload body.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub owner_id: String,
    pub file_name: String,
    pub content_type: String,
    pub is_public: bool,
}

/// A blob written by [`FileService::store_blob`] that has no record yet.
#[derive(Debug)]
pub struct StoredBlob {
    object_id: String,
    size_bytes: i64,
    etag: String,
}

/// A file the caller is allowed to read, with its payload opened.
pub struct FileDownload {
    pub record: FileRecord,
    pub body: BlobStream,
}

#[derive(Clone)]
pub struct FileService {
    repository: Arc<dyn FileRepository>,
    blobs: Arc<dyn BlobStore>,
}

impl FileService {
    pub fn new(repository: Arc<dyn FileRepository>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { repository, blobs }
    }

    /// First half of an upload: stream `body` into the blob store under a
    /// freshly generated key, computing size and MD5 on the way.
    ///
    /// Nothing is recorded yet. The caller finishes with [`Self::record`] or
    /// gives the blob up with [`Self::discard`]. A failure while reading
    /// `body` is reported as [`FileError::Body`], not as a storage failure.
    pub async fn store_blob<S>(&self, body: S) -> FileResult<StoredBlob>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let object_id = Uuid::new_v4().to_string();

        let mut digest = md5::Context::new();
        let mut size_bytes: i64 = 0;
        {
            let tapped = body.map(|chunk| {
                if let Ok(bytes) = &chunk {
                    digest.consume(bytes);
                    size_bytes += bytes.len() as i64;
                }
                chunk
            });
            match self.blobs.put(&object_id, tapped.boxed()).await {
                Ok(()) => {}
                Err(BlobError::Body(err)) => return Err(FileError::Body(err)),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(StoredBlob {
            object_id,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }

    /// Second half of an upload: insert the record for a stored blob.
    ///
    /// Removes the blob again (best effort) when the insert fails. Returns
    /// the new object id.
    pub async fn record(&self, blob: StoredBlob, file: NewFile) -> FileResult<String> {
        let record = FileRecord {
            object_id: blob.object_id,
            owner_id: file.owner_id,
            file_name: file.file_name,
            content_type: file.content_type,
            is_public: file.is_public,
            size_bytes: blob.size_bytes,
            etag: blob.etag,
            created_at: Utc::now(),
        };

        if let Err(err) = self.repository.insert(&record).await {
            self.remove_blob(&record.object_id, "metadata insert failed")
                .await;
            return Err(err.into());
        }

        info!(
            object_id = %record.object_id,
            owner_id = %record.owner_id,
            size_bytes = record.size_bytes,
            is_public = record.is_public,
            "file uploaded"
        );
        Ok(record.object_id)
    }

    /// Drop a stored blob that will never be recorded.
    pub async fn discard(&self, blob: StoredBlob) {
        self.remove_blob(&blob.object_id, "upload abandoned").await;
    }

    async fn remove_blob(&self, object_id: &str, reason: &str) {
        if let Err(err) = self.blobs.delete(object_id).await {
            warn!(
                object_id = %object_id,
                error = %err,
                "failed to remove blob after {}", reason
            );
        }
    }

    /// Open `object_id` for `subject`.
    ///
    /// Returns NotFound when no record exists and Unauthorized when the
    /// access policy denies; the blob store is not touched in either case.
    /// A record whose blob is missing is a storage failure, not NotFound.
    pub async fn download(&self, object_id: &str, subject: &Subject) -> FileResult<FileDownload> {
        let record = self
            .repository
            .find_by_object_id(object_id)
            .await?
            .ok_or_else(|| FileError::NotFound(object_id.to_string()))?;

        if !may_view(&record, subject) {
            return Err(FileError::Unauthorized(object_id.to_string()));
        }

        let body = self.blobs.get(&record.object_id).await?;

        info!(
            object_id = %record.object_id,
            subject = %subject.id,
            size_bytes = record.size_bytes,
            "file download started"
        );
        Ok(FileDownload { record, body })
    }
}
