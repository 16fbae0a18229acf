//! Blob storage for file payloads.
//!
//! `BlobStore` is the narrow put/get/delete capability the file service
//! needs. `ObjectStoreBlobs` implements it on top of any `object_store`
//! backend: S3/MinIO in production, the local filesystem for development and
//! `InMemory` in tests. All keys live in the one bucket the store was built
//! for.

use crate::config::ObjectStoreSettings;
use anyhow::Context;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use object_store::{
    MultipartUpload, ObjectStore, PutPayload, aws::AmazonS3Builder, local::LocalFileSystem,
    path::Path,
};
use std::{io, path::PathBuf, sync::Arc};
use tokio::task::JoinSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Request body handed to [`BlobStore::put`].
pub type UploadBody<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Payload stream returned by [`BlobStore::get`].
pub type BlobStream = BoxStream<'static, Result<Bytes, BlobError>>;

/// S3 rejects multipart parts smaller than 5 MiB (except the last one).
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Upper bound on multipart parts buffered or in flight at once.
const MAX_IN_FLIGHT_PARTS: usize = 4;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("failed reading upload body: {0}")]
    Body(#[source] io::Error),
    #[error(transparent)]
    Store(#[from] object_store::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write the whole body under `key`. Returns once the store acknowledged
    /// the write; on error nothing is left behind under `key`.
    async fn put(&self, key: &str, body: UploadBody<'_>) -> BlobResult<()>;

    /// Open the blob under `key` for streaming.
    async fn get(&self, key: &str) -> BlobResult<BlobStream>;

    async fn delete(&self, key: &str) -> BlobResult<()>;
}

/// [`BlobStore`] over an `object_store` backend.
#[derive(Clone)]
pub struct ObjectStoreBlobs {
    store: Arc<dyn ObjectStore>,
    part_size: usize,
}

impl ObjectStoreBlobs {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_part_size(store, DEFAULT_PART_SIZE)
    }

    /// Payloads up to `part_size` bytes go out in a single PUT; anything
    /// larger becomes a multipart upload with parts of this size.
    pub fn with_part_size(store: Arc<dyn ObjectStore>, part_size: usize) -> Self {
        Self {
            store,
            part_size: part_size.max(1),
        }
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobs {
    async fn put(&self, key: &str, mut body: UploadBody<'_>) -> BlobResult<()> {
        let location = Path::from(key);

        // Buffer at most one part before deciding between PUT and multipart.
        let mut head = BytesMut::new();
        while head.len() < self.part_size {
            match body.next().await {
                Some(chunk) => head.extend_from_slice(&chunk.map_err(BlobError::Body)?),
                None => {
                    let size = head.len();
                    self.store
                        .put(&location, PutPayload::from(head.freeze()))
                        .await?;
                    debug!("stored {} ({} bytes) with a single put", location, size);
                    return Ok(());
                }
            }
        }

        let upload = self.store.put_multipart(&location).await?;
        let mut pending = PendingMultipart::new(location.clone(), upload, self.part_size);
        let written = async {
            pending.write(&head).await?;
            while let Some(chunk) = body.next().await {
                pending.write(&chunk.map_err(BlobError::Body)?).await?;
            }
            pending.finish().await
        }
        .await;

        match written {
            Ok(()) => {
                debug!("stored {} with a multipart upload", location);
                Ok(())
            }
            Err(err) => {
                pending.abort().await;
                Err(err)
            }
        }
    }

    async fn get(&self, key: &str) -> BlobResult<BlobStream> {
        let location = Path::from(key);
        let result = self.store.get(&location).await.map_err(|err| match err {
            object_store::Error::NotFound { .. } => BlobError::NotFound(key.to_string()),
            other => BlobError::Store(other),
        })?;
        Ok(result.into_stream().map_err(BlobError::Store).boxed())
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.store.delete(&Path::from(key)).await?;
        Ok(())
    }
}

/// A multipart upload that gets aborted unless it is finished.
///
/// Parts are cut at `part_size` and uploaded concurrently, at most
/// [`MAX_IN_FLIGHT_PARTS`] at a time. The upload handle is kept until the
/// store confirmed completion, so any failure (including one while waiting
/// for the last parts) can still abort it. Dropping it mid-transfer (the
/// request was cancelled) spawns the abort.
struct PendingMultipart {
    location: Path,
    upload: Option<Box<dyn MultipartUpload>>,
    buffer: BytesMut,
    part_size: usize,
    in_flight: JoinSet<object_store::Result<()>>,
}

impl PendingMultipart {
    fn new(location: Path, upload: Box<dyn MultipartUpload>, part_size: usize) -> Self {
        Self {
            location,
            upload: Some(upload),
            buffer: BytesMut::new(),
            part_size,
            in_flight: JoinSet::new(),
        }
    }

    async fn write(&mut self, chunk: &[u8]) -> BlobResult<()> {
        self.buffer.extend_from_slice(chunk);
        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.put_part(part).await?;
        }
        Ok(())
    }

    async fn put_part(&mut self, part: Bytes) -> BlobResult<()> {
        while self.in_flight.len() >= MAX_IN_FLIGHT_PARTS {
            self.join_next().await?;
        }
        if let Some(upload) = self.upload.as_mut() {
            self.in_flight.spawn(upload.put_part(PutPayload::from(part)));
        }
        Ok(())
    }

    async fn join_next(&mut self) -> BlobResult<()> {
        if let Some(joined) = self.in_flight.join_next().await {
            joined.map_err(object_store::Error::from)??;
        }
        Ok(())
    }

    async fn finish(&mut self) -> BlobResult<()> {
        if !self.buffer.is_empty() {
            let last = self.buffer.split().freeze();
            self.put_part(last).await?;
        }
        while !self.in_flight.is_empty() {
            self.join_next().await?;
        }
        if let Some(upload) = self.upload.as_mut() {
            upload.complete().await?;
            self.upload = None;
        }
        Ok(())
    }

    async fn abort(&mut self) {
        self.in_flight.abort_all();
        if let Some(mut upload) = self.upload.take() {
            if let Err(err) = upload.abort().await {
                warn!("failed to abort multipart upload {}: {}", self.location, err);
            }
        }
    }
}

impl Drop for PendingMultipart {
    fn drop(&mut self) {
        let Some(mut upload) = self.upload.take() else {
            return;
        };
        self.in_flight.abort_all();
        let location = self.location.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = upload.abort().await {
                    warn!("failed to abort dropped multipart upload {}: {}", location, err);
                }
            });
        }
    }
}

/// Build the object store backend described by `settings`.
///
/// With an endpoint configured this is an S3-compatible client using
/// path-style addressing (MinIO needs it); otherwise payloads are kept on the
/// local filesystem under `storage_dir/bucket`.
pub fn build_object_store(settings: &ObjectStoreSettings) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match &settings.endpoint {
        Some(endpoint) => {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(&settings.bucket)
                .with_region(&settings.region)
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
            if let Some(access_key) = &settings.access_key {
                builder = builder.with_access_key_id(access_key);
            }
            if let Some(secret_key) = &settings.secret_key {
                builder = builder.with_secret_access_key(secret_key);
            }
            let store = builder
                .build()
                .with_context(|| format!("building S3 client for bucket `{}`", settings.bucket))?;
            Ok(Arc::new(store))
        }
        None => {
            let root: PathBuf = [settings.storage_dir.as_str(), settings.bucket.as_str()]
                .iter()
                .collect();
            std::fs::create_dir_all(&root)
                .with_context(|| format!("creating storage directory {}", root.display()))?;
            let store = LocalFileSystem::new_with_prefix(&root)
                .with_context(|| format!("opening storage directory {}", root.display()))?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, stream};
    use object_store::{PutResult, UploadPart, memory::InMemory};
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    fn body(chunks: Vec<&'static [u8]>) -> UploadBody<'static> {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed()
    }

    async fn read_all(blobs: &ObjectStoreBlobs, key: &str) -> Vec<u8> {
        let chunks: Vec<Bytes> = blobs.get(key).await.unwrap().try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn small_payload_is_stored_with_single_put() {
        let blobs = ObjectStoreBlobs::new(Arc::new(InMemory::new()));
        blobs.put("small", body(vec![b"hello ", b"world"])).await.unwrap();
        assert_eq!(read_all(&blobs, "small").await, b"hello world");
    }

    #[tokio::test]
    async fn payload_larger_than_a_part_uses_multipart() {
        let blobs = ObjectStoreBlobs::with_part_size(Arc::new(InMemory::new()), 4);
        blobs
            .put("large", body(vec![b"abc", b"defgh", b"ijklmnop", b"q"]))
            .await
            .unwrap();
        assert_eq!(read_all(&blobs, "large").await, b"abcdefghijklmnopq");
    }

    #[tokio::test]
    async fn empty_payload_round_trips() {
        let blobs = ObjectStoreBlobs::new(Arc::new(InMemory::new()));
        blobs.put("empty", body(vec![])).await.unwrap();
        assert!(read_all(&blobs, "empty").await.is_empty());
    }

    #[tokio::test]
    async fn body_error_leaves_nothing_behind() {
        let store = Arc::new(InMemory::new());
        let blobs = ObjectStoreBlobs::with_part_size(store, 4);
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"abcdef")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ])
        .boxed();

        let err = blobs.put("broken", failing).await.unwrap_err();
        assert!(matches!(err, BlobError::Body(_)));
        assert!(matches!(
            blobs.get("broken").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let blobs = ObjectStoreBlobs::new(Arc::new(InMemory::new()));
        assert!(matches!(
            blobs.get("nope").await,
            Err(BlobError::NotFound(key)) if key == "nope"
        ));
    }

    #[tokio::test]
    async fn delete_removes_blob() {
        let blobs = ObjectStoreBlobs::new(Arc::new(InMemory::new()));
        blobs.put("gone", body(vec![b"x"])).await.unwrap();
        blobs.delete("gone").await.unwrap();
        assert!(matches!(blobs.get("gone").await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn cancelled_upload_leaves_nothing_behind() {
        let store = Arc::new(InMemory::new());
        let blobs = ObjectStoreBlobs::with_part_size(store.clone(), 4);
        let stalled = stream::iter(vec![
            Ok(Bytes::from_static(b"abcdef")),
            Ok(Bytes::from_static(b"ghijkl")),
        ])
        .chain(stream::pending())
        .boxed();

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), blobs.put("cancelled", stalled)).await;
        assert!(outcome.is_err());
        tokio::task::yield_now().await;

        let listed: Vec<_> = store.list(None).try_collect().await.unwrap();
        assert!(listed.is_empty());
    }

    /// Multipart upload that records what happened to it.
    #[derive(Debug, Default)]
    struct RecordingUpload {
        fail_parts: bool,
        stall_parts: bool,
        completed: Arc<AtomicBool>,
        aborted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MultipartUpload for RecordingUpload {
        fn put_part(&mut self, _data: PutPayload) -> UploadPart {
            if self.stall_parts {
                futures::future::pending().boxed()
            } else if self.fail_parts {
                futures::future::ready(Err(object_store::Error::Generic {
                    store: "recording",
                    source: "part rejected".into(),
                }))
                .boxed()
            } else {
                futures::future::ready(Ok(())).boxed()
            }
        }

        async fn complete(&mut self) -> object_store::Result<PutResult> {
            self.completed.store(true, Ordering::SeqCst);
            Ok(PutResult {
                e_tag: None,
                version: None,
            })
        }

        async fn abort(&mut self) -> object_store::Result<()> {
            self.aborted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn eventually(flag: &AtomicBool) -> bool {
        for _ in 0..20 {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            tokio::task::yield_now().await;
        }
        flag.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn failed_final_part_still_aborts_upload() {
        let upload = RecordingUpload {
            fail_parts: true,
            ..Default::default()
        };
        let (completed, aborted) = (upload.completed.clone(), upload.aborted.clone());
        let mut pending = PendingMultipart::new(Path::from("k"), Box::new(upload), 4);

        pending.write(b"abc").await.unwrap();
        let err = pending.finish().await.unwrap_err();
        assert!(matches!(err, BlobError::Store(_)));
        assert!(!completed.load(Ordering::SeqCst));

        pending.abort().await;
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_unfinished_upload_aborts_it() {
        let upload = RecordingUpload {
            stall_parts: true,
            ..Default::default()
        };
        let aborted = upload.aborted.clone();
        let mut pending = PendingMultipart::new(Path::from("k"), Box::new(upload), 4);
        pending.write(b"abcdefgh").await.unwrap();

        drop(pending);
        assert!(eventually(&aborted).await);
    }

    #[tokio::test]
    async fn finished_upload_is_not_aborted() {
        let upload = RecordingUpload::default();
        let (completed, aborted) = (upload.completed.clone(), upload.aborted.clone());
        let mut pending = PendingMultipart::new(Path::from("k"), Box::new(upload), 4);

        pending.write(b"abcdefghij").await.unwrap();
        pending.finish().await.unwrap();
        drop(pending);

        assert!(completed.load(Ordering::SeqCst));
        assert!(!eventually(&aborted).await);
    }
}
