//! Chunk reader — reconstructs an object's byte stream lazily, one
//! chunk per pull, without materializing the whole object.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use super::catalog::Catalog;
use super::chunk_store::ChunkStore;
use super::{StoreError, StoreResult};
use crate::models::entry::CatalogEntry;

/// A lazy, forward-only byte stream over an object. Restart by
/// reopening.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

pub struct ChunkReader {
    catalog: Catalog,
    chunks: Arc<dyn ChunkStore>,
}

struct Cursor {
    chunks: Arc<dyn ChunkStore>,
    key: String,
    index: u32,
    end_index: u32,
    skip: u64,
    remaining: u64,
}

impl ChunkReader {
    pub fn new(catalog: Catalog, chunks: Arc<dyn ChunkStore>) -> Self {
        Self { catalog, chunks }
    }

    /// Open a stream over the full object. NotFound unless a `Complete`
    /// entry exists for `key`.
    pub async fn open_stream(&self, key: &str) -> StoreResult<(CatalogEntry, ByteStream)> {
        let entry = self.catalog.get_complete(key).await?;
        let size = entry.size_bytes.max(0) as u64;
        let stream = self.range_stream(&entry, 0, size);
        Ok((entry, stream))
    }

    /// Open a stream over `[offset, offset + length)`. The reader
    /// computes which chunks the range spans and touches only those.
    pub async fn open_range_stream(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> StoreResult<(CatalogEntry, ByteStream)> {
        let entry = self.catalog.get_complete(key).await?;
        let size = entry.size_bytes.max(0) as u64;
        if offset > size || length > size - offset {
            return Err(StoreError::RangeNotSatisfiable {
                offset,
                length,
                size,
            });
        }
        let stream = self.range_stream(&entry, offset, length);
        Ok((entry, stream))
    }

    fn range_stream(&self, entry: &CatalogEntry, offset: u64, length: u64) -> ByteStream {
        let chunk_size = entry.chunk_size.max(1) as u64;
        let cursor = Cursor {
            chunks: self.chunks.clone(),
            key: entry.key.clone(),
            index: (offset / chunk_size) as u32,
            end_index: ((offset + length).div_ceil(chunk_size)) as u32,
            skip: offset % chunk_size,
            remaining: length,
        };

        stream::try_unfold(cursor, |mut cur| async move {
            if cur.remaining == 0 || cur.index >= cur.end_index {
                return Ok(None);
            }
            let mut fetched = cur
                .chunks
                .get_chunk_range(&cur.key, cur.index, cur.index + 1)
                .await
                .map_err(io::Error::other)?;
            let chunk = fetched.pop().ok_or_else(|| {
                io::Error::other(format!("chunk {} missing for key `{}`", cur.index, cur.key))
            })?;

            let mut payload = chunk.payload;
            if cur.skip > 0 {
                let skip = (cur.skip as usize).min(payload.len());
                payload = payload.slice(skip..);
                cur.skip = 0;
            }
            if payload.len() as u64 > cur.remaining {
                payload.truncate(cur.remaining as usize);
            }
            cur.remaining -= payload.len() as u64;
            cur.index += 1;
            Ok(Some((payload, cur)))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::tests::memory_catalog;
    use crate::services::chunk_store::FsChunkStore;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    async fn seeded_reader(chunk_size: usize, payload: &[u8]) -> (ChunkReader, TempDir) {
        let catalog = memory_catalog().await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsChunkStore::new(dir.path()));

        catalog.create("key.bin", "key.bin", None).await.unwrap();
        let mut count = 0i64;
        for (index, piece) in payload.chunks(chunk_size).enumerate() {
            store
                .put_chunk("key.bin", index as u32, Bytes::copy_from_slice(piece))
                .await
                .unwrap();
            count += 1;
        }
        catalog
            .mark_complete("key.bin", payload.len() as i64, count, "etag")
            .await
            .unwrap();
        // Recorded chunk_size drives the range math, not the constant.
        sqlx::query("UPDATE entries SET chunk_size = ? WHERE key = 'key.bin'")
            .bind(chunk_size as i64)
            .execute(catalog.pool())
            .await
            .unwrap();

        (ChunkReader::new(catalog, store), dir)
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
        parts.concat()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn full_stream_reproduces_payload() {
        let data = pattern(10 * 16 + 5);
        let (reader, _dir) = seeded_reader(16, &data).await;
        let (entry, stream) = reader.open_stream("key.bin").await.unwrap();
        assert_eq!(entry.size_bytes as usize, data.len());
        assert_eq!(collect(stream).await, data);
    }

    #[tokio::test]
    async fn range_spanning_one_chunk_reads_only_that_chunk() {
        let data = pattern(16 * 4);
        let (reader, _dir) = seeded_reader(16, &data).await;
        // bytes [16+10, 16+20) live entirely in chunk index 1
        let (_, stream) = reader.open_range_stream("key.bin", 26, 10).await.unwrap();
        assert_eq!(collect(stream).await, &data[26..36]);
    }

    #[tokio::test]
    async fn range_crossing_chunk_boundaries() {
        let data = pattern(16 * 4 + 3);
        let (reader, _dir) = seeded_reader(16, &data).await;
        let (_, stream) = reader.open_range_stream("key.bin", 15, 34).await.unwrap();
        assert_eq!(collect(stream).await, &data[15..49]);
    }

    #[tokio::test]
    async fn zero_length_range_is_empty() {
        let data = pattern(32);
        let (reader, _dir) = seeded_reader(16, &data).await;
        let (_, stream) = reader.open_range_stream("key.bin", 8, 0).await.unwrap();
        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn out_of_bounds_ranges_are_rejected() {
        let data = pattern(32);
        let (reader, _dir) = seeded_reader(16, &data).await;

        let err = reader.open_range_stream("key.bin", 33, 0).await.err().unwrap();
        assert!(matches!(err, StoreError::RangeNotSatisfiable { .. }));

        let err = reader.open_range_stream("key.bin", 30, 10).await.err().unwrap();
        assert!(matches!(err, StoreError::RangeNotSatisfiable { .. }));
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let data = pattern(32);
        let (reader, _dir) = seeded_reader(16, &data).await;
        let err = reader.open_stream("missing.bin").await.err().unwrap();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
