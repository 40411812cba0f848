//! Core data models for the media store.
//!
//! Entries represent the catalog's view of a stored object. They map
//! cleanly to the SQLite table via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod entry;
