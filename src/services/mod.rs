//! Core services: key generation, chunked persistence, catalog, and the
//! upload/deletion orchestration tying them together.

use std::io;
use thiserror::Error;

pub mod catalog;
pub mod chunk_store;
pub mod keys;
pub mod media_store;
pub mod reader;
pub mod writer;

/// Fixed chunk size applied when slicing an upload's byte stream.
/// Every chunk except the last has exactly this many bytes.
pub const CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("object key `{key}` already exists")]
    Conflict { key: String },
    #[error("range {offset}+{length} is outside object of {size} bytes")]
    RangeNotSatisfiable { offset: u64, length: u64, size: u64 },
    #[error("invalid object key")]
    InvalidKey,
    #[error("upload input stream failed: {0}")]
    InputStream(io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
