//! streamloom-store-sqlite
//! ============================================================================
//! Module: SQLite Store Backend
//! Description: A durable `Store` implementation backed by SQLite WAL, for
//!              single-host deployments that need survivable stream state
//!              without standing up a document database.
//! Purpose: Persist events, streams, and memberships across process restarts.
//! Dependencies: streamloom-core, rusqlite, serde_json, thiserror, time, uuid
//! ============================================================================

pub mod store;

pub use store::{SqliteStore, SqliteStoreConfig, SqliteStoreError, SqliteStoreMode, SqliteSyncMode};
