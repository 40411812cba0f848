//! Upload and deletion orchestration over the catalog and chunk store.
//!
//! `MediaStore` is the facade the HTTP layer talks to. It owns an
//! explicitly constructed catalog + chunk store pair (no ambient
//! globals) and coordinates them so partially written objects are never
//! visible and failed uploads leave nothing behind.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use sqlx::SqlitePool;
use tracing::debug;

use super::catalog::Catalog;
use super::chunk_store::{ChunkStore, FsChunkStore};
use super::keys;
use super::reader::{ByteStream, ChunkReader};
use super::writer::ChunkWriter;
use super::{CHUNK_SIZE, StoreError, StoreResult};
use crate::models::entry::CatalogEntry;

#[derive(Clone)]
pub struct MediaStore {
    pub catalog: Catalog,
    pub chunks: Arc<dyn ChunkStore>,

    /// Root directory of the filesystem backend, kept for readiness
    /// probes.
    pub storage_root: PathBuf,

    /// Keys with an upload in flight. At most one active writer per key;
    /// a second upload landing on the same key is a Conflict.
    active: Arc<Mutex<HashSet<String>>>,
}

/// Releases the per-key upload claim on every exit path.
struct UploadClaim {
    active: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for UploadClaim {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl MediaStore {
    /// Build a store over a SQLite catalog and a filesystem chunk
    /// backend rooted at `storage_dir`.
    pub fn new(db: Arc<SqlitePool>, storage_dir: impl Into<PathBuf>) -> Self {
        let storage_root: PathBuf = storage_dir.into();
        Self {
            catalog: Catalog::new(db),
            chunks: Arc::new(FsChunkStore::new(storage_root.clone())),
            storage_root,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, key: &str) -> StoreResult<UploadClaim> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.to_string()) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        Ok(UploadClaim {
            active: self.active.clone(),
            key: key.to_string(),
        })
    }

    /// Upload one object: generate its key, stream the input through
    /// the chunk writer in fixed-size pieces, and mark the entry
    /// complete only after the input ends cleanly.
    ///
    /// Any input or backend failure purges the partial chunks and the
    /// pending entry before the error surfaces, so aborted uploads
    /// leave no retrievable state.
    pub async fn upload_stream<S>(
        &self,
        filename: &str,
        content_type: Option<&str>,
        stream: S,
    ) -> StoreResult<CatalogEntry>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let key = keys::generate_key(filename)?;
        let _claim = self.claim(&key)?;

        let mut writer = ChunkWriter::begin(
            self.catalog.clone(),
            self.chunks.clone(),
            key.clone(),
            filename,
            content_type,
        )
        .await?;

        let outcome = async {
            pump(&mut writer, stream).await?;
            writer.finish().await
        }
        .await;

        match outcome {
            Ok(entry) => Ok(entry),
            Err(err) => {
                self.cleanup_failed(&key).await;
                Err(err)
            }
        }
    }

    /// Delete an object: chunks first, catalog row second, with a
    /// `deleting` status in between so a crash mid-way is detectable.
    ///
    /// Deleting a key that never existed, or was already deleted, is
    /// NotFound — not a silent success.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.catalog.get(key).await?;
        self.catalog.set_deleting(key).await?;
        self.chunks.delete_all(key).await?;
        self.catalog.remove(key).await?;
        Ok(())
    }

    /// Stream the full object for `key`.
    pub async fn read(&self, key: &str) -> StoreResult<(CatalogEntry, ByteStream)> {
        self.reader().open_stream(key).await
    }

    /// Stream `[offset, offset + length)` of the object for `key`.
    pub async fn read_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> StoreResult<(CatalogEntry, ByteStream)> {
        self.reader().open_range_stream(key, offset, length).await
    }

    /// Metadata for a complete object.
    pub async fn entry(&self, key: &str) -> StoreResult<CatalogEntry> {
        self.catalog.get_complete(key).await
    }

    /// All complete entries.
    pub async fn list(&self) -> StoreResult<Vec<CatalogEntry>> {
        self.catalog.list().await
    }

    fn reader(&self) -> ChunkReader {
        ChunkReader::new(self.catalog.clone(), self.chunks.clone())
    }

    /// Best-effort purge after a failed upload. Failures here are
    /// logged, never allowed to mask the original error.
    async fn cleanup_failed(&self, key: &str) {
        if let Err(err) = self.chunks.delete_all(key).await {
            debug!(key, error = %err, "failed to purge chunks after aborted upload");
        }
        if let Err(err) = self.catalog.remove(key).await {
            debug!(key, error = %err, "failed to remove entry after aborted upload");
        }
    }
}

/// Slice the incoming byte stream into `CHUNK_SIZE` pieces and feed
/// them to the writer. Pulls from the input only after the previous
/// chunk is persisted, so a slow backend backpressures the producer
/// instead of buffering unbounded input.
async fn pump<S>(writer: &mut ChunkWriter, stream: S) -> StoreResult<()>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    pin_mut!(stream);
    let mut buf = BytesMut::new();
    while let Some(next) = stream.next().await {
        let data = next.map_err(StoreError::InputStream)?;
        buf.extend_from_slice(&data);
        while buf.len() >= CHUNK_SIZE {
            writer.write_chunk(buf.split_to(CHUNK_SIZE).freeze()).await?;
        }
    }
    if !buf.is_empty() {
        writer.write_chunk(buf.freeze()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entry::EntryStatus;
    use crate::services::catalog::apply_schema;
    use futures::TryStreamExt;
    use futures::stream;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn test_store() -> (MediaStore, TempDir) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool, include_str!("../../migrations/0001_init.sql"))
            .await
            .unwrap();
        let dir = TempDir::new().unwrap();
        (MediaStore::new(Arc::new(pool), dir.path()), dir)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Input stream yielding `data` in uneven pieces, to exercise the
    /// re-chunking independently of chunk boundaries.
    fn byte_stream(data: Vec<u8>, piece: usize) -> impl Stream<Item = io::Result<Bytes>> + Send {
        let pieces: Vec<io::Result<Bytes>> = data
            .chunks(piece.max(1))
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        stream::iter(pieces)
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
        parts.concat()
    }

    #[tokio::test]
    async fn empty_upload_completes_with_zero_chunks() {
        let (store, _dir) = test_store().await;
        let entry = store
            .upload_stream("empty.txt", Some("text/plain"), byte_stream(Vec::new(), 64))
            .await
            .unwrap();

        assert!(entry.key.ends_with(".txt"));
        assert_eq!(entry.status, EntryStatus::Complete);
        assert_eq!(entry.size_bytes, 0);
        assert_eq!(entry.chunk_count, 0);

        let (_, stream) = store.read(&entry.key).await.unwrap();
        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn round_trip_is_exact_independent_of_chunk_boundaries() {
        let (store, _dir) = test_store().await;
        for len in [1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE + 123] {
            let data = pattern(len);
            let entry = store
                .upload_stream("blob.bin", None, byte_stream(data.clone(), 7001))
                .await
                .unwrap();

            assert_eq!(entry.size_bytes as usize, len);
            assert_eq!(entry.chunk_count as usize, len.div_ceil(CHUNK_SIZE));

            let (_, stream) = store.read(&entry.key).await.unwrap();
            assert_eq!(collect(stream).await, data, "len {len}");
        }
    }

    #[tokio::test]
    async fn large_upload_has_contiguous_chunks_and_exact_range_reads() {
        let (store, _dir) = test_store().await;
        let len = 3 * CHUNK_SIZE + CHUNK_SIZE / 2;
        let data = pattern(len);
        let entry = store
            .upload_stream("big.bin", None, byte_stream(data.clone(), 60_000))
            .await
            .unwrap();

        assert_eq!(entry.chunk_count, 4);
        let chunks = store
            .chunks
            .get_chunk_range(&entry.key, 0, 4)
            .await
            .unwrap();
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[1].len(), CHUNK_SIZE);
        assert_eq!(chunks[2].len(), CHUNK_SIZE);
        assert_eq!(chunks[3].len(), CHUNK_SIZE / 2);

        // 10 bytes entirely inside chunk index 1
        let offset = (CHUNK_SIZE + 10) as u64;
        let (_, stream) = store.read_range(&entry.key, offset, 10).await.unwrap();
        assert_eq!(
            collect(stream).await,
            &data[CHUNK_SIZE + 10..CHUNK_SIZE + 20]
        );
    }

    #[tokio::test]
    async fn range_outside_bounds_is_rejected() {
        let (store, _dir) = test_store().await;
        let entry = store
            .upload_stream("small.bin", None, byte_stream(pattern(100), 100))
            .await
            .unwrap();

        let err = store.read_range(&entry.key, 101, 0).await.err().unwrap();
        assert!(matches!(err, StoreError::RangeNotSatisfiable { .. }));
        let err = store.read_range(&entry.key, 90, 20).await.err().unwrap();
        assert!(matches!(err, StoreError::RangeNotSatisfiable { .. }));
    }

    #[tokio::test]
    async fn listing_reflects_uploads_and_deletions() {
        let (store, _dir) = test_store().await;
        let mut keys = Vec::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            let entry = store
                .upload_stream(name, None, byte_stream(pattern(10), 10))
                .await
                .unwrap();
            keys.push(entry.key);
        }

        store.delete(&keys[1]).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        let listed_keys: Vec<&str> = listed.iter().map(|e| e.key.as_str()).collect();
        assert!(listed_keys.contains(&keys[0].as_str()));
        assert!(!listed_keys.contains(&keys[1].as_str()));
        assert!(listed_keys.contains(&keys[2].as_str()));
    }

    #[tokio::test]
    async fn second_delete_reports_not_found() {
        let (store, _dir) = test_store().await;
        let entry = store
            .upload_stream("once.bin", None, byte_stream(pattern(10), 10))
            .await
            .unwrap();

        store.delete(&entry.key).await.unwrap();
        let err = store.delete(&entry.key).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let err = store.delete("neverexisted.bin").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_purges_chunk_data() {
        let (store, _dir) = test_store().await;
        let entry = store
            .upload_stream("gone.bin", None, byte_stream(pattern(CHUNK_SIZE + 1), 9000))
            .await
            .unwrap();
        assert!(store.chunks.exists(&entry.key).await.unwrap());

        store.delete(&entry.key).await.unwrap();
        assert!(!store.chunks.exists(&entry.key).await.unwrap());
        assert!(matches!(
            store.read(&entry.key).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn aborted_upload_leaves_no_retrievable_state() {
        let (store, _dir) = test_store().await;
        let pieces: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from(pattern(CHUNK_SIZE))),
            Ok(Bytes::from(pattern(100))),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client gone")),
        ];

        let err = store
            .upload_stream("partial.bin", None, stream::iter(pieces))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InputStream(_)));

        assert!(store.list().await.unwrap().is_empty());
        // The generated key is gone with the failure; sweep the backend
        // for any leftover chunk directories instead.
        let mut walker = vec![store.storage_root.clone()];
        while let Some(dir) = walker.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir).await.unwrap();
            while let Some(dirent) = read_dir.next_entry().await.unwrap() {
                assert!(
                    dirent.file_type().await.unwrap().is_dir(),
                    "orphan chunk file {:?}",
                    dirent.path()
                );
                walker.push(dirent.path());
            }
        }
    }

    #[tokio::test]
    async fn pending_entries_are_unreadable() {
        let (store, _dir) = test_store().await;
        store
            .catalog
            .create("feedface00000000000000000000beef.bin", "x.bin", None)
            .await
            .unwrap();

        let err = store
            .read("feedface00000000000000000000beef.bin")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_uploads_receive_distinct_keys() {
        let (store, _dir) = test_store().await;
        let (a, b) = tokio::join!(
            store.upload_stream("same.bin", None, byte_stream(pattern(1000), 100)),
            store.upload_stream("same.bin", None, byte_stream(pattern(1000), 100)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.key, b.key);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
