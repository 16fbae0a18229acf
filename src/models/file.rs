//! Represents an uploaded file attachment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for a single uploaded file.
///
/// The payload itself lives in the object store under `object_id`; this row
/// only records who owns it and how it should be served back. Records are
/// written once, after the payload write succeeded, and never updated.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Opaque identifier, also the object-store key.
    pub object_id: String,

    /// Subject id of the uploader.
    pub owner_id: String,

    /// Original client-supplied filename, only used for `Content-Disposition`.
    pub file_name: String,

    /// Content type (MIME type) echoed back on download.
    pub content_type: String,

    /// Whether any authenticated subject may download the file.
    pub is_public: bool,

    /// Size in bytes of the stored payload.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// When the record was persisted.
    pub created_at: DateTime<Utc>,
}
