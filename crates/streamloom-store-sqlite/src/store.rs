// streamloom-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Store
// Description: Durable Store backed by SQLite WAL.
// Purpose: Persist events, streams, and memberships with crash-survivable
//          writes and an optimistic claim protocol for ready streams.
// Dependencies: streamloom-core, rusqlite, serde_json, thiserror, time, uuid
// ============================================================================

//! ## Overview
//! This module implements a durable [`Store`] using `SQLite`. Three tables
//! back the contract: `events` (raw payloads keyed by id), `streams` (the
//! lifecycle rows, one per identifying-trait signature), and `memberships`
//! (the event-to-stream join). All field names that may contain `.` are
//! scrubbed to `~` before they reach a JSON column, mirroring every other
//! backend's contract even though `SQLite` itself has no reserved character.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Deserialize;
use streamloom_core::{
    scrub_keys, unscrub_keys, CursorState, Event, IdentifyingTraitDict, ScanOutcome, Stream,
    StreamId, StreamState, Store, StoreError, Timestamp, TriggerDefinition, TriggerName,
};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for this store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum event payload size accepted by the store.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite`-backed store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Payload exceeded configured size limits.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => {
                Self::Unavailable(message)
            }
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => {
                Self::Invalid(format!("schema version mismatch: {message}"))
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::TooLarge { max_bytes, actual_bytes } => Self::Invalid(format!(
                "payload exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed [`Store`] with WAL support.
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens a `SQLite`-backed store, creating the schema if it does not
    /// already exist.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Store for SqliteStore {
    fn save_event(&self, event: &Event) -> Result<(), StoreError> {
        let scrubbed = scrub_keys(event.fields());
        let bytes = serde_json::to_vec(&scrubbed)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        if bytes.len() > MAX_EVENT_BYTES {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: MAX_EVENT_BYTES,
                actual_bytes: bytes.len(),
            }
            .into());
        }
        let connection = self.lock();
        connection
            .execute(
                "INSERT INTO events (message_id, fields_json) VALUES (?1, ?2)
                 ON CONFLICT(message_id) DO NOTHING",
                params![event.id().as_str(), bytes],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn append_event(
        &self,
        trigger: &TriggerDefinition,
        event: &Event,
        trait_dict: &IdentifyingTraitDict,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let signature = serde_json::to_string(&scrub_keys(&serde_json::Value::Object(trait_dict.clone())))
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let now_text = format_rfc3339(now)?;

        let mut connection = self.lock();
        let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT stream_id FROM streams
                 WHERE trigger_name = ?1 AND identifying_traits_json = ?2 AND state = ?3
                 LIMIT 1",
                params![trigger.name().as_str(), signature, StreamState::Collecting.as_i32()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        let (stream_id, is_new) = if let Some(stream_id) = existing {
            tx.execute(
                "UPDATE streams SET last_update = ?1 WHERE stream_id = ?2",
                params![now_text, stream_id],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            (stream_id, false)
        } else {
            let stream_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO streams (
                    stream_id, trigger_name, identifying_traits_json,
                    state, state_version, last_update, commit_errors, last_error
                 ) VALUES (?1, ?2, ?3, ?4, 0, ?5, 0, '')",
                params![
                    stream_id,
                    trigger.name().as_str(),
                    signature,
                    StreamState::Collecting.as_i32(),
                    now_text
                ],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            (stream_id, true)
        };

        tx.execute(
            "INSERT INTO memberships (stream_id, message_id) VALUES (?1, ?2)",
            params![stream_id, event.id().as_str()],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(is_new)
    }

    fn do_trigger_check(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
        now: Timestamp,
    ) -> Result<ScanOutcome, StoreError> {
        let debugger = streamloom_core::Debugger::new(trigger.name().clone());
        let limit = if chunk <= 0 { i64::MAX } else { chunk };

        let rows = {
            let connection = self.lock();
            let mut statement = connection
                .prepare(
                    "SELECT stream_id, trigger_name, identifying_traits_json, state,
                            state_version, last_update, commit_errors, last_error
                     FROM streams
                     WHERE trigger_name = ?1 AND state = ?2
                     ORDER BY last_update ASC
                     LIMIT ?3 OFFSET ?4",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let rows = statement
                .query_map(
                    params![
                        trigger.name().as_str(),
                        StreamState::Collecting.as_i32(),
                        limit,
                        cursor.offset()
                    ],
                    row_to_stream,
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
                .collect::<rusqlite::Result<Vec<Stream>>>()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            rows
        };

        let scanned = i64::try_from(rows.len()).unwrap_or(0);
        cursor.advance(scanned, chunk);

        let mut transitioned = 0i64;
        for stream in &rows {
            if trigger.criterion().should_fire(stream, None, &debugger, now) {
                self.cas_transition(stream.stream_id(), stream.state_version(), StreamState::Ready)?;
                transitioned += 1;
            }
        }

        Ok(ScanOutcome { scanned, transitioned, locked: 0 })
    }

    fn process_ready_streams(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
        _now: Timestamp,
        on_claimed: &mut dyn FnMut(Stream) -> Result<(), StoreError>,
    ) -> Result<ScanOutcome, StoreError> {
        let limit = if chunk <= 0 { i64::MAX } else { chunk };

        let rows = {
            let connection = self.lock();
            let mut statement = connection
                .prepare(
                    "SELECT stream_id, trigger_name, identifying_traits_json, state,
                            state_version, last_update, commit_errors, last_error
                     FROM streams
                     WHERE trigger_name = ?1 AND state = ?2
                     ORDER BY last_update ASC
                     LIMIT ?3 OFFSET ?4",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            statement
                .query_map(
                    params![trigger.name().as_str(), StreamState::Ready.as_i32(), limit, cursor.offset()],
                    row_to_stream,
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
                .collect::<rusqlite::Result<Vec<Stream>>>()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        };

        let scanned = i64::try_from(rows.len()).unwrap_or(0);
        cursor.advance(scanned, chunk);

        let mut transitioned = 0i64;
        let mut locked = 0i64;
        for stream in rows {
            let claimed = self.cas_transition(
                stream.stream_id(),
                stream.state_version(),
                StreamState::Triggered,
            )?;
            if !claimed {
                locked += 1;
                continue;
            }
            let events = self.load_events(stream.stream_id())?;
            let mut claimed_stream = stream;
            claimed_stream.set_events(events);
            on_claimed(claimed_stream)?;
            transitioned += 1;
        }

        Ok(ScanOutcome { scanned, transitioned, locked })
    }

    fn purge_processed_streams(
        &self,
        trigger: &TriggerDefinition,
        _cursor: &mut CursorState,
        _chunk: i64,
    ) -> Result<ScanOutcome, StoreError> {
        let connection = self.lock();
        let removed = connection
            .execute(
                "DELETE FROM streams WHERE trigger_name = ?1 AND state = ?2",
                params![trigger.name().as_str(), StreamState::Processed.as_i32()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let removed = i64::try_from(removed).unwrap_or(0);
        Ok(ScanOutcome { scanned: removed, transitioned: removed, locked: 0 })
    }

    fn load_events(&self, stream_id: &StreamId) -> Result<Vec<Event>, StoreError> {
        let connection = self.lock();
        let mut statement = connection
            .prepare(
                "SELECT e.fields_json FROM memberships m
                 JOIN events e ON e.message_id = m.message_id
                 WHERE m.stream_id = ?1
                 ORDER BY m.rowid ASC",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut events: Vec<Event> = statement
            .query_map(params![stream_id.as_str()], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?
            .map(|bytes| -> Result<Event, SqliteStoreError> {
                let bytes = bytes.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                let value: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
                Event::from_value(unscrub_keys(&value))
                    .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
            })
            .collect::<Result<Vec<Event>, SqliteStoreError>>()?;
        events.sort_by_key(Event::timestamp_key);
        Ok(events)
    }

    fn ready(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        self.transition(stream_id, StreamState::Ready)
    }

    fn trigger(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        self.transition(stream_id, StreamState::Triggered)
    }

    fn processed(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        self.transition(stream_id, StreamState::Processed)
    }

    fn error(&self, stream_id: &StreamId, message: &str) -> Result<(), StoreError> {
        let connection = self.lock();
        let affected = connection
            .execute(
                "UPDATE streams SET state = ?1, state_version = state_version + 1, last_error = ?2
                 WHERE stream_id = ?3",
                params![StreamState::Error.as_i32(), message, stream_id.as_str()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if affected == 0 {
            return Err(StoreError::UnknownStream(stream_id.clone()));
        }
        Ok(())
    }

    fn commit_error(&self, stream_id: &StreamId, message: &str) -> Result<(), StoreError> {
        let connection = self.lock();
        let affected = connection
            .execute(
                "UPDATE streams SET state = ?1, state_version = state_version + 1,
                        last_error = ?2, commit_errors = commit_errors + 1
                 WHERE stream_id = ?3",
                params![StreamState::CommitError.as_i32(), message, stream_id.as_str()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if affected == 0 {
            return Err(StoreError::UnknownStream(stream_id.clone()));
        }
        Ok(())
    }

    fn get_num_active_streams(&self, trigger_name: &TriggerName) -> Result<u64, StoreError> {
        let connection = self.lock();
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM streams WHERE trigger_name = ?1",
                params![trigger_name.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn find_streams(
        &self,
        state: StreamState,
        trigger_name: Option<&TriggerName>,
    ) -> Result<Vec<Stream>, StoreError> {
        let connection = self.lock();
        let rows = if let Some(trigger_name) = trigger_name {
            let mut statement = connection
                .prepare(
                    "SELECT stream_id, trigger_name, identifying_traits_json, state,
                            state_version, last_update, commit_errors, last_error
                     FROM streams WHERE state = ?1 AND trigger_name = ?2
                     ORDER BY last_update ASC",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            statement
                .query_map(params![state.as_i32(), trigger_name.as_str()], row_to_stream)
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
                .collect::<rusqlite::Result<Vec<Stream>>>()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        } else {
            let mut statement = connection
                .prepare(
                    "SELECT stream_id, trigger_name, identifying_traits_json, state,
                            state_version, last_update, commit_errors, last_error
                     FROM streams WHERE state = ?1
                     ORDER BY last_update ASC",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            statement
                .query_map(params![state.as_i32()], row_to_stream)
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
                .collect::<rusqlite::Result<Vec<Stream>>>()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        };
        Ok(rows)
    }

    fn get_stream(&self, stream_id: &StreamId, with_events: bool) -> Result<Option<Stream>, StoreError> {
        let found = {
            let connection = self.lock();
            connection
                .query_row(
                    "SELECT stream_id, trigger_name, identifying_traits_json, state,
                            state_version, last_update, commit_errors, last_error
                     FROM streams WHERE stream_id = ?1",
                    params![stream_id.as_str()],
                    row_to_stream,
                )
                .optional()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        };
        let Some(mut found) = found else {
            return Ok(None);
        };
        if with_events {
            found.set_events(self.load_events(stream_id)?);
        }
        Ok(Some(found))
    }

    fn flush_all(&self) -> Result<(), StoreError> {
        let connection = self.lock();
        connection
            .execute_batch("DELETE FROM memberships; DELETE FROM streams; DELETE FROM events;")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }
}

impl SqliteStore {
    /// Attempts the compare-and-swap claim: flips `stream_id` to `target`
    /// only if its `state_version` still matches `expected_version`.
    /// Returns `false` when another worker won the race first.
    fn cas_transition(
        &self,
        stream_id: &StreamId,
        expected_version: u64,
        target: StreamState,
    ) -> Result<bool, StoreError> {
        let expected_version = i64::try_from(expected_version).unwrap_or(i64::MAX);
        let connection = self.lock();
        let affected = connection
            .execute(
                "UPDATE streams SET state = ?1, state_version = state_version + 1
                 WHERE stream_id = ?2 AND state_version = ?3",
                params![target.as_i32(), stream_id.as_str(), expected_version],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(affected == 1)
    }

    fn transition(&self, stream_id: &StreamId, target: StreamState) -> Result<(), StoreError> {
        let connection = self.lock();
        let affected = connection
            .execute(
                "UPDATE streams SET state = ?1, state_version = state_version + 1 WHERE stream_id = ?2",
                params![target.as_i32(), stream_id.as_str()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if affected == 0 {
            return Err(StoreError::UnknownStream(stream_id.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn row_to_stream(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stream> {
    let stream_id: String = row.get(0)?;
    let trigger_name: String = row.get(1)?;
    let traits_json: String = row.get(2)?;
    let state: i32 = row.get(3)?;
    let state_version: i64 = row.get(4)?;
    let last_update: String = row.get(5)?;
    let commit_errors: i64 = row.get(6)?;
    let last_error: String = row.get(7)?;

    let traits_value: serde_json::Value =
        serde_json::from_str(&traits_json).map_err(|err| corrupt_row(2, err))?;
    let traits_value = unscrub_keys(&traits_value);
    let identifying_traits: IdentifyingTraitDict = traits_value
        .as_object()
        .cloned()
        .ok_or_else(|| corrupt_row(2, "identifying_traits_json is not an object"))?;
    let state =
        StreamState::from_i32(state).ok_or_else(|| corrupt_row(3, format!("unknown stream state: {state}")))?;
    let last_update = Timestamp::parse_rfc3339(&last_update).map_err(|err| corrupt_row(5, err))?;

    Ok(Stream::from_parts(
        StreamId::new(stream_id),
        TriggerName::new(trigger_name),
        identifying_traits,
        state,
        u64::try_from(state_version).unwrap_or(0),
        last_update,
        u64::try_from(commit_errors).unwrap_or(0),
        last_error,
    ))
}

/// Wraps a row-parsing failure as a `rusqlite::Error` so it can flow
/// through `query_map`/`query_row` alongside genuine engine errors.
fn corrupt_row(column: usize, err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(SqliteStoreError::Corrupt(err.to_string())),
    )
}

fn format_rfc3339(ts: Timestamp) -> Result<String, SqliteStoreError> {
    ts.as_offset_date_time()
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with durable defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates an existing one.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS events (
                    message_id TEXT PRIMARY KEY,
                    fields_json BLOB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS streams (
                    stream_id TEXT PRIMARY KEY,
                    trigger_name TEXT NOT NULL,
                    identifying_traits_json TEXT NOT NULL,
                    state INTEGER NOT NULL,
                    state_version INTEGER NOT NULL,
                    last_update TEXT NOT NULL,
                    commit_errors INTEGER NOT NULL,
                    last_error TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_streams_trigger_state_update
                    ON streams (trigger_name, state, last_update);
                CREATE INDEX IF NOT EXISTS idx_streams_trigger_signature
                    ON streams (trigger_name, identifying_traits_json, state);
                CREATE TABLE IF NOT EXISTS memberships (
                    stream_id TEXT NOT NULL,
                    message_id TEXT NOT NULL,
                    PRIMARY KEY (stream_id, message_id)
                );
                CREATE INDEX IF NOT EXISTS idx_memberships_stream
                    ON memberships (stream_id);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}
