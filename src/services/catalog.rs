//! Object catalog — the SQLite-backed directory of known objects.
//!
//! The catalog maps object key to metadata and is the only shared
//! mutable resource in the store. Mutations are single SQL statements,
//! so they serialize per key without any global lock.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{CHUNK_SIZE, StoreError, StoreResult};
use crate::models::entry::{CatalogEntry, EntryStatus};

const ENTRY_COLUMNS: &str = "id, key, filename, content_type, size_bytes, chunk_count, \
     chunk_size, etag, status, created_at";

#[derive(Clone)]
pub struct Catalog {
    db: Arc<SqlitePool>,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a fresh `Pending` entry for `key`.
    ///
    /// A duplicate key is a Conflict, never a silent overwrite — the key
    /// generator's collision probability is negligible, but a collision
    /// must still surface.
    pub async fn create(
        &self,
        key: &str,
        filename: &str,
        content_type: Option<&str>,
    ) -> StoreResult<CatalogEntry> {
        let entry = CatalogEntry {
            id: Uuid::new_v4(),
            key: key.to_string(),
            filename: filename.to_string(),
            content_type: content_type.map(str::to_string),
            size_bytes: 0,
            chunk_count: 0,
            chunk_size: CHUNK_SIZE as i64,
            etag: None,
            status: EntryStatus::Pending,
            created_at: Utc::now(),
        };

        let insert = sqlx::query(
            "INSERT INTO entries (id, key, filename, content_type, size_bytes, chunk_count, \
             chunk_size, etag, status, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id)
        .bind(&entry.key)
        .bind(&entry.filename)
        .bind(entry.content_type.as_deref())
        .bind(entry.size_bytes)
        .bind(entry.chunk_count)
        .bind(entry.chunk_size)
        .bind(entry.etag.as_deref())
        .bind(entry.status)
        .bind(entry.created_at)
        .execute(&*self.db)
        .await;

        match insert {
            Ok(_) => Ok(entry),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict {
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    /// Transition a `Pending` entry to `Complete` and record its final
    /// totals. Idempotent: a second call matches zero rows.
    pub async fn mark_complete(
        &self,
        key: &str,
        size_bytes: i64,
        chunk_count: i64,
        etag: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE entries SET status = 'complete', size_bytes = ?, chunk_count = ?, etag = ? \
             WHERE key = ? AND status = 'pending'",
        )
        .bind(size_bytes)
        .bind(chunk_count)
        .bind(etag)
        .bind(key)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Fetch an entry regardless of status.
    pub async fn get(&self, key: &str) -> StoreResult<CatalogEntry> {
        let query = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE key = ?");
        sqlx::query_as::<_, CatalogEntry>(&query)
            .bind(key)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| not_found_or(err, key))
    }

    /// Fetch an entry only if it is `Complete`; anything else is NotFound
    /// as far as readers are concerned.
    pub async fn get_complete(&self, key: &str) -> StoreResult<CatalogEntry> {
        let query =
            format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE key = ? AND status = 'complete'");
        sqlx::query_as::<_, CatalogEntry>(&query)
            .bind(key)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| not_found_or(err, key))
    }

    /// All `Complete` entries, ordered by creation time then key. The
    /// ordering is stable within one call.
    pub async fn list(&self) -> StoreResult<Vec<CatalogEntry>> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE status = 'complete' \
             ORDER BY created_at ASC, key ASC"
        );
        Ok(sqlx::query_as::<_, CatalogEntry>(&query)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Flag an entry as undergoing deletion.
    pub async fn set_deleting(&self, key: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE entries SET status = 'deleting' WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Remove an entry outright. Chunks must already be purged.
    pub async fn remove(&self, key: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM entries WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

/// Apply schema SQL statement by statement. Used by the `--migrate`
/// startup mode and by tests against in-memory databases.
pub async fn apply_schema(db: &SqlitePool, sql: &str) -> StoreResult<()> {
    for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

fn not_found_or(err: sqlx::Error, key: &str) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound {
            key: key.to_string(),
        },
        other => StoreError::Sqlx(other),
    }
}

/// Return true if the SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
