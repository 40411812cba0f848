//! Chunk writer — persists one upload's byte stream as an ordered
//! sequence of chunks under a single key.

use std::sync::Arc;

use bytes::Bytes;

use super::catalog::Catalog;
use super::chunk_store::ChunkStore;
use super::StoreResult;
use crate::models::entry::CatalogEntry;

/// Sequential writer for one object. At most one writer may be active
/// per key; the orchestrator enforces that.
///
/// The writer accepts arbitrarily sized buffers: it only assigns the
/// next sequence index and delegates persistence to the chunk store.
/// Slicing the input into fixed-size chunks is the caller's job.
pub struct ChunkWriter {
    catalog: Catalog,
    chunks: Arc<dyn ChunkStore>,
    key: String,
    next_index: u32,
    size_bytes: u64,
    digest: md5::Context,
    finished: bool,
}

impl ChunkWriter {
    /// Register a `Pending` catalog entry for `key` and return a writer
    /// for it. A duplicate key surfaces as Conflict.
    pub async fn begin(
        catalog: Catalog,
        chunks: Arc<dyn ChunkStore>,
        key: String,
        filename: &str,
        content_type: Option<&str>,
    ) -> StoreResult<Self> {
        catalog.create(&key, filename, content_type).await?;
        Ok(Self {
            catalog,
            chunks,
            key,
            next_index: 0,
            size_bytes: 0,
            digest: md5::Context::new(),
            finished: false,
        })
    }

    /// Persist `payload` as the next chunk in sequence. On failure the
    /// entry stays `Pending` and the orchestrator purges it.
    pub async fn write_chunk(&mut self, payload: Bytes) -> StoreResult<()> {
        self.digest.consume(&payload);
        self.size_bytes += payload.len() as u64;
        self.chunks
            .put_chunk(&self.key, self.next_index, payload)
            .await?;
        self.next_index += 1;
        Ok(())
    }

    /// Mark the entry `Complete` with its final totals. The only
    /// operation allowed to make that transition, and idempotent: a
    /// second call changes nothing.
    pub async fn finish(&mut self) -> StoreResult<CatalogEntry> {
        if !self.finished {
            let digest = std::mem::replace(&mut self.digest, md5::Context::new());
            let etag = format!("{:x}", digest.compute());
            self.catalog
                .mark_complete(
                    &self.key,
                    self.size_bytes as i64,
                    self.next_index as i64,
                    &etag,
                )
                .await?;
            self.finished = true;
        }
        self.catalog.get(&self.key).await
    }
}
