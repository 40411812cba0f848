//! Object key generation.
//!
//! Keys are 16 bytes of OS randomness, hex-encoded, with the lowercase
//! extension of the original filename appended (leading dot included).
//! The shape is an external contract: clients address objects by it.

use std::io;
use std::path::Path;

use rand::TryRngCore;
use rand::rngs::OsRng;

use super::{StoreError, StoreResult};

/// Generate a fresh object key for `original_filename`.
///
/// Fails only if the OS randomness source is unavailable, in which case
/// unique keys cannot be produced and the request must abort.
pub fn generate_key(original_filename: &str) -> StoreResult<String> {
    let mut raw = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|err| StoreError::Io(io::Error::other(err)))?;

    let mut key = hex::encode(raw);
    if let Some(ext) = Path::new(original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        key.push('.');
        key.push_str(&ext.to_ascii_lowercase());
    }
    Ok(key)
}
