//! Catalog entry for a stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a catalog entry.
///
/// Only `Complete` entries are visible to listing and read operations.
/// `Deleting` marks an entry whose chunks are being purged, so a crash
/// mid-deletion is detectable.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Complete,
    Deleting,
}

/// Metadata record for one stored object.
///
/// The entry describes the object; the payload itself lives in the chunk
/// store as a sequence of fixed-size chunks addressed by `key` and index.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Generated object key (32 hex chars plus original extension).
    /// The sole external handle to the object.
    pub key: String,

    /// Original filename supplied at upload time. May be empty.
    pub filename: String,

    /// Content type (MIME type) reported by the client, if any.
    pub content_type: Option<String>,

    /// Total payload size in bytes.
    #[serde(rename = "size")]
    pub size_bytes: i64,

    /// Number of chunks persisted for this object.
    pub chunk_count: i64,

    /// Chunk size the object was written with. Recorded per entry so
    /// readers never assume the current compile-time constant.
    pub chunk_size: i64,

    /// MD5 of the full payload, computed while streaming the upload.
    pub etag: Option<String>,

    /// Current lifecycle status.
    pub status: EntryStatus,

    /// When the upload began.
    pub created_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Content type to report to clients, defaulting to the generic
    /// octet-stream marker.
    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}
