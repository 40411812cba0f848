//! Chunk store abstraction and the local-filesystem reference backend.
//!
//! A chunk store durably persists the bounded-size chunks an object's
//! byte stream is sliced into, addressed by (object key, sequence
//! index). Any backend satisfying the put / get-range / delete-all /
//! exists contract is substitutable.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::{StoreError, StoreResult};

const MAX_KEY_LEN: usize = 1024;

/// One bounded-size binary segment of an object's byte stream.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub key: String,
    pub index: u32,
    pub payload: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.payload.len()
    }
}

/// Durable storage of named chunks.
///
/// Guarantees: chunks for a key, once written, are retrievable in the
/// same order; `delete_all` removes every chunk for a key and is a
/// no-op when none exist.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persist the chunk at `index` for `key`.
    async fn put_chunk(&self, key: &str, index: u32, payload: Bytes) -> StoreResult<()>;

    /// Fetch the chunks in the half-open index range `[from_index, to_index)`,
    /// in sequence order. A chunk missing inside the range is a backend
    /// fault, not a NotFound.
    async fn get_chunk_range(
        &self,
        key: &str,
        from_index: u32,
        to_index: u32,
    ) -> StoreResult<Vec<Chunk>>;

    /// Remove every chunk stored for `key`. No-op when zero chunks exist.
    async fn delete_all(&self, key: &str) -> StoreResult<()>;

    /// Whether any chunk data exists for `key`.
    async fn exists(&self, key: &str) -> StoreResult<bool>;
}

/// Reject keys that could escape the chunk root or collide with
/// internal temp files.
fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidKey);
    }
    if key.starts_with('.') || key.contains("..") {
        return Err(StoreError::InvalidKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidKey);
    }
    Ok(())
}

/// Filesystem-backed chunk store: a directory per key beneath a
/// two-level shard, one file per chunk.
///
/// Layout: `base_path/{shard}/{shard}/{key}/{index:08}.chunk`, where the
/// shards are the first two bytes of MD5(key). Keeps per-directory file
/// counts bounded.
#[derive(Clone, Debug)]
pub struct FsChunkStore {
    base_path: PathBuf,
}

impl FsChunkStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Directory holding every chunk of `key`. May not exist yet.
    fn key_dir(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn chunk_path(&self, key: &str, index: u32) -> PathBuf {
        self.key_dir(key).join(format!("{index:08}.chunk"))
    }

    /// Remove empty shard directories left behind after a key purge.
    /// Stops at the first non-empty directory or at the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    async fn put_chunk(&self, key: &str, index: u32, payload: Bytes) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir).await?;

        // Write to a temp file and rename so a crash never leaves a
        // readable half-written chunk.
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = write_durably(&mut file, &payload).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, self.chunk_path(key, index)).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(())
    }

    async fn get_chunk_range(
        &self,
        key: &str,
        from_index: u32,
        to_index: u32,
    ) -> StoreResult<Vec<Chunk>> {
        ensure_key_safe(key)?;
        let mut chunks = Vec::with_capacity(to_index.saturating_sub(from_index) as usize);
        for index in from_index..to_index {
            let path = self.chunk_path(key, index);
            let payload = fs::read(&path).await.map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::Io(io::Error::other(format!(
                        "chunk {index} missing for key `{key}`"
                    )))
                } else {
                    StoreError::Io(err)
                }
            })?;
            chunks.push(Chunk {
                key: key.to_string(),
                index,
                payload: Bytes::from(payload),
            });
        }
        Ok(chunks)
    }

    async fn delete_all(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let dir = self.key_dir(key);
        match fs::remove_dir_all(&dir).await {
            Ok(_) => debug!("removed chunk directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StoreError::Io(err)),
        }
        if let Some(parent) = dir.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        ensure_key_safe(key)?;
        match fs::metadata(self.key_dir(key)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}

async fn write_durably(file: &mut File, payload: &[u8]) -> io::Result<()> {
    file.write_all(payload).await?;
    file.flush().await?;
    file.sync_all().await
}
