//! The lifecycle entity that groups events sharing one identifying-trait
//! signature under one trigger definition.

use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;

use super::event::Event;
use super::identifiers::{StreamId, TriggerName};
use super::time::Timestamp;

/// The stable, wire-compatible lifecycle states a [`Stream`] moves through.
///
/// The integer values are part of the persisted contract: they MUST stay
/// stable across releases and across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StreamState {
    /// Accumulating events; the happy-path entry state.
    Collecting = 1,
    /// The trigger's criterion was satisfied; waiting to be claimed.
    Ready = 2,
    /// Claimed by a worker; callbacks are running.
    Triggered = 3,
    /// All callbacks ran to completion.
    Processed = 4,
    /// An `on_trigger` callback failed.
    Error = 5,
    /// A `commit` callback failed.
    CommitError = 6,
}

impl StreamState {
    /// The stable integer value for this state.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Recovers a `StreamState` from its stable integer value.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Collecting),
            2 => Some(Self::Ready),
            3 => Some(Self::Triggered),
            4 => Some(Self::Processed),
            5 => Some(Self::Error),
            6 => Some(Self::CommitError),
            _ => None,
        }
    }
}

/// The identifying-field values extracted from an event per a trigger's
/// declared paths, and the invariant signature of a [`Stream`].
pub type IdentifyingTraitDict = JsonMap<String, serde_json::Value>;

/// A group of events sharing one identifying-trait signature under one
/// trigger definition.
///
/// Instances are materialized by a [`crate::interfaces::Store`] and are
/// expected to be short-lived: the authoritative state lives in the store
/// and may change under a caller holding a `Stream` snapshot, which is why
/// every transition is guarded by [`Stream::state_version`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    stream_id: StreamId,
    trigger_name: TriggerName,
    identifying_traits: IdentifyingTraitDict,
    state: StreamState,
    state_version: u64,
    last_update: Timestamp,
    commit_errors: u64,
    last_error: String,
    #[serde(skip)]
    events: Option<Vec<Event>>,
}

impl Stream {
    /// Builds a freshly created stream in `Collecting`, at `state_version`
    /// zero. `created_at` becomes `last_update`; per the append contract,
    /// `last_update` is not advanced again until a second event arrives.
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        trigger_name: TriggerName,
        identifying_traits: IdentifyingTraitDict,
        created_at: Timestamp,
    ) -> Self {
        Self {
            stream_id,
            trigger_name,
            identifying_traits,
            state: StreamState::Collecting,
            state_version: 0,
            last_update: created_at,
            commit_errors: 0,
            last_error: String::new(),
            events: None,
        }
    }

    /// Reconstructs a stream from its persisted fields, as a [`crate::interfaces::Store`]
    /// implementation loads it back from its backing storage.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "Mirrors the full persisted row shape.")]
    pub fn from_parts(
        stream_id: StreamId,
        trigger_name: TriggerName,
        identifying_traits: IdentifyingTraitDict,
        state: StreamState,
        state_version: u64,
        last_update: Timestamp,
        commit_errors: u64,
        last_error: String,
    ) -> Self {
        Self {
            stream_id,
            trigger_name,
            identifying_traits,
            state,
            state_version,
            last_update,
            commit_errors,
            last_error,
            events: None,
        }
    }

    /// The stream's server-generated identity.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// The trigger definition this stream belongs to.
    #[must_use]
    pub fn trigger_name(&self) -> &TriggerName {
        &self.trigger_name
    }

    /// The identifying-trait signature this stream was created for.
    #[must_use]
    pub fn identifying_traits(&self) -> &IdentifyingTraitDict {
        &self.identifying_traits
    }

    /// Returns true when `traits` matches this stream's signature exactly.
    #[must_use]
    pub fn matches_signature(&self, traits: &IdentifyingTraitDict) -> bool {
        &self.identifying_traits == traits
    }

    /// The stream's current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// The optimistic-concurrency version, incremented on every transition.
    #[must_use]
    pub const fn state_version(&self) -> u64 {
        self.state_version
    }

    /// The timestamp of the stream's most recent append (or its creation
    /// time, if only one event has ever arrived).
    #[must_use]
    pub const fn last_update(&self) -> Timestamp {
        self.last_update
    }

    /// The number of times this stream has hit `CommitError`.
    #[must_use]
    pub const fn commit_errors(&self) -> u64 {
        self.commit_errors
    }

    /// The most recent error message, empty when the stream is healthy.
    #[must_use]
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// This stream's events, ordered ascending by timestamp, if they have
    /// been loaded via [`Stream::set_events`].
    #[must_use]
    pub fn events(&self) -> Option<&[Event]> {
        self.events.as_deref()
    }

    /// Attaches a lazily loaded, already-ordered event list. Mirrors the
    /// reference implementation's "derived classes load events on demand"
    /// split: a `Stream` materialized for the trigger-check scan never
    /// needs this, only one handed to the callback host does.
    pub fn set_events(&mut self, events: Vec<Event>) {
        self.events = Some(events);
    }

    /// Advances `last_update` to `now`. Per (I3), this only happens on
    /// appends to an already-existing stream, never on creation.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_update = now;
    }

    /// Applies a state transition and bumps `state_version`. Backing
    /// stores perform the equivalent conditional update against the
    /// version they read; this mutator exists so in-process callers (and
    /// tests) can model the same bookkeeping without a store round trip.
    pub fn transition_to(&mut self, state: StreamState) {
        self.state = state;
        self.state_version += 1;
    }

    /// Transitions to `Error` and records the message, per (I2) only ever
    /// through this explicit path.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.last_error = message.into();
        self.transition_to(StreamState::Error);
    }

    /// Transitions to `CommitError`, records the message, and increments
    /// `commit_errors`.
    pub fn mark_commit_error(&mut self, message: impl Into<String>) {
        self.last_error = message.into();
        self.commit_errors += 1;
        self.transition_to(StreamState::CommitError);
    }
}
