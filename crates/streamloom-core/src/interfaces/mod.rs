//! The persistence abstraction every storage backend conforms to.

use crate::core::event::Event;
use crate::core::identifiers::{StreamId, TriggerName};
use crate::core::stream::{IdentifyingTraitDict, Stream, StreamState};
use crate::core::time::Timestamp;
use crate::core::trigger_definition::TriggerDefinition;
use crate::errors::StoreError;

/// A worker-local, opaque offset used to paginate periodic scans.
///
/// Cursor state is never shared across workers: correctness of the claim
/// protocol relies on the compare-and-swap in [`Store::process_ready_streams`],
/// not on any exclusivity between cursors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorState {
    offset: i64,
}

impl CursorState {
    /// A fresh cursor, starting at offset zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { offset: 0 }
    }

    /// The current offset.
    #[must_use]
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Advances the cursor after a scan of `scanned` rows out of a
    /// requested page of `chunk`. A short page (fewer rows than requested)
    /// wraps the cursor back to zero; otherwise it advances by the number
    /// actually scanned.
    ///
    /// `chunk <= 0` means "no chunking," and the cursor never advances.
    pub fn advance(&mut self, scanned: i64, chunk: i64) {
        if chunk <= 0 {
            return;
        }
        if scanned < chunk {
            self.offset = 0;
        } else {
            self.offset += scanned;
        }
    }
}

/// The outcome of one `do_trigger_check` or `process_ready_streams` pass,
/// reported back to the periodic driver for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Streams inspected during this pass.
    pub scanned: i64,
    /// Streams that transitioned as a result of this pass.
    pub transitioned: i64,
    /// Claim attempts that lost the compare-and-swap race (only relevant
    /// to `process_ready_streams`).
    pub locked: i64,
}

/// The abstract persistence contract: event ingestion, stream grouping,
/// the lifecycle state machine, and the periodic scan/claim operations.
///
/// Implementations MUST uphold invariants (I1)-(I5) described alongside
/// [`Stream`]: exactly one `Collecting` stream per signature, transitions
/// only through the methods below, `last_update` advanced only on append
/// to an existing stream, no deletion outside `purge_processed_streams`,
/// and ordered replay in [`Store::load_events`].
pub trait Store: Send + Sync {
    /// Persists a raw event, idempotently by its id. Implementations MUST
    /// recursively scrub `.` to `~` in any map keys before handing the
    /// event to a backend that reserves `.` in field names.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn save_event(&self, event: &Event) -> Result<(), StoreError>;

    /// Atomically finds or creates the unique `Collecting` stream matching
    /// `(trigger.name(), trait_dict)`, then records a membership for
    /// `event`. Returns `true` when this call created the stream.
    ///
    /// Advances `last_update` only when the stream already existed, per
    /// (I3).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn append_event(
        &self,
        trigger: &TriggerDefinition,
        event: &Event,
        trait_dict: &IdentifyingTraitDict,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Scans `Collecting` streams for `trigger`, ordered by `last_update`
    /// ascending, paginated by `cursor`/`chunk`. Each scanned stream has
    /// its criterion evaluated with `last_event = None`; satisfying
    /// streams transition to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn do_trigger_check(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
        now: Timestamp,
    ) -> Result<ScanOutcome, StoreError>;

    /// Scans `Ready` streams for `trigger`, attempting an optimistic claim
    /// (`state = Triggered`, `state_version += 1`, guarded by the version
    /// last observed) on each. A lost claim increments the outcome's
    /// `locked` counter and is otherwise ignored. Successfully claimed
    /// streams are handed to `on_claimed` before the scan continues.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn process_ready_streams(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
        now: Timestamp,
        on_claimed: &mut dyn FnMut(Stream) -> Result<(), StoreError>,
    ) -> Result<ScanOutcome, StoreError>;

    /// Deletes streams in `Processed` state for `trigger` (their events
    /// and memberships are left untouched, per (I4)).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn purge_processed_streams(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
    ) -> Result<ScanOutcome, StoreError>;

    /// Loads a stream's events, ordered ascending by timestamp. Idempotent
    /// and safe to call lazily, since not every callback needs payloads.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached or the
    /// stream does not exist.
    fn load_events(&self, stream_id: &StreamId) -> Result<Vec<Event>, StoreError>;

    /// Transitions a stream to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached or the
    /// stream does not exist.
    fn ready(&self, stream_id: &StreamId) -> Result<(), StoreError>;

    /// Transitions a stream to `Triggered` outside of the claim loop (used
    /// by tests exercising the callback host directly).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached or the
    /// stream does not exist.
    fn trigger(&self, stream_id: &StreamId) -> Result<(), StoreError>;

    /// Transitions a stream to `Processed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached or the
    /// stream does not exist.
    fn processed(&self, stream_id: &StreamId) -> Result<(), StoreError>;

    /// Transitions a stream to `Error` and records `message`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached or the
    /// stream does not exist.
    fn error(&self, stream_id: &StreamId, message: &str) -> Result<(), StoreError>;

    /// Transitions a stream to `CommitError`, records `message`, and
    /// increments its `commit_errors` counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached or the
    /// stream does not exist.
    fn commit_error(&self, stream_id: &StreamId, message: &str) -> Result<(), StoreError>;

    /// The number of streams currently tracked for `trigger_name`,
    /// regardless of state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn get_num_active_streams(&self, trigger_name: &TriggerName) -> Result<u64, StoreError>;

    /// Lists streams in `state`, optionally restricted to `trigger_name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn find_streams(
        &self,
        state: StreamState,
        trigger_name: Option<&TriggerName>,
    ) -> Result<Vec<Stream>, StoreError>;

    /// Fetches one stream by id, optionally with its events loaded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn get_stream(&self, stream_id: &StreamId, with_events: bool) -> Result<Option<Stream>, StoreError>;

    /// Erases all persisted state. Test-only; never invoked in production
    /// code paths.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached.
    fn flush_all(&self) -> Result<(), StoreError>;
}

/// Recursively substitutes `.` for `~` in every object key of `value`,
/// per the field-name scrubbing contract backends that reserve `.` in
/// document field names require.
#[must_use]
pub fn scrub_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut scrubbed = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                scrubbed.insert(key.replace('.', "~"), scrub_keys(val));
            }
            serde_json::Value::Object(scrubbed)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(scrub_keys).collect())
        }
        other => other.clone(),
    }
}

/// Reverses [`scrub_keys`], substituting `~` back to `.` in every object
/// key. Callers reading a scrubbed document back MUST apply this, even on
/// backends where scrubbing itself was unnecessary, to preserve
/// round-tripping.
#[must_use]
pub fn unscrub_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut unscrubbed = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                unscrubbed.insert(key.replace('~', "."), unscrub_keys(val));
            }
            serde_json::Value::Object(unscrubbed)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(unscrub_keys).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{scrub_keys, unscrub_keys, CursorState};

    #[test]
    fn cursor_wraps_on_short_page() {
        let mut cursor = CursorState::new();
        cursor.advance(100, 100);
        assert_eq!(cursor.offset(), 100);
        cursor.advance(100, 100);
        assert_eq!(cursor.offset(), 200);
        cursor.advance(50, 100);
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    fn no_chunking_never_advances() {
        let mut cursor = CursorState::new();
        cursor.advance(250, 0);
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    fn scrub_round_trips_nested_keys() {
        let original = json!({"payload.audit": {"a.b": [1, {"c.d": 2}]}});
        let scrubbed = scrub_keys(&original);
        assert_eq!(scrubbed, json!({"payload~audit": {"a~b": [1, {"c~d": 2}]}}));
        assert_eq!(unscrub_keys(&scrubbed), original);
    }
}
