//! A single-process [`Store`] backed by nested maps, intended for unit
//! tests and small deployments with no cross-process coordination needs.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::core::event::Event;
use crate::core::identifiers::{EventId, StreamId, TriggerName};
use crate::core::stream::{IdentifyingTraitDict, Stream, StreamState};
use crate::core::time::Timestamp;
use crate::core::trigger_definition::TriggerDefinition;
use crate::errors::StoreError;
use crate::interfaces::{CursorState, ScanOutcome, Store};

struct TriggerBucket {
    streams: HashMap<StreamId, Stream>,
    memberships: HashMap<StreamId, Vec<EventId>>,
}

impl TriggerBucket {
    fn new() -> Self {
        Self {
            streams: HashMap::new(),
            memberships: HashMap::new(),
        }
    }
}

/// An in-memory [`Store`]. Streams live in a map keyed by
/// `trigger_name -> stream_id`, guarded by one mutex per trigger bucket so
/// concurrent ingest against unrelated triggers does not serialize.
pub struct InMemoryStore {
    events: Mutex<HashMap<EventId, Event>>,
    buckets: Mutex<HashMap<TriggerName, Mutex<TriggerBucket>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn with_bucket<R>(&self, trigger_name: &TriggerName, f: impl FnOnce(&mut TriggerBucket) -> R) -> R {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = buckets
            .entry(trigger_name.clone())
            .or_insert_with(|| Mutex::new(TriggerBucket::new()));
        let mut guard = bucket.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    fn scan_state(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
        mut advance_stream: impl FnMut(&mut Stream, Timestamp) -> Result<bool, StoreError>,
        now: Timestamp,
    ) -> Result<ScanOutcome, StoreError> {
        self.with_bucket(trigger.name(), |bucket| {
            let mut ordered: Vec<&mut Stream> = bucket.streams.values_mut().collect();
            ordered.sort_by_key(|s| s.last_update());

            let start = usize::try_from(cursor.offset()).unwrap_or(0).min(ordered.len());
            let end = if chunk <= 0 {
                ordered.len()
            } else {
                let window = usize::try_from(chunk).unwrap_or(ordered.len());
                (start + window).min(ordered.len())
            };

            let mut transitioned = 0i64;
            #[allow(clippy::needless_range_loop, reason = "Indexing keeps the mutable borrow scoped per-slot.")]
            for index in start..end {
                if advance_stream(ordered[index], now)? {
                    transitioned += 1;
                }
            }
            let scanned = i64::try_from(end - start).unwrap_or(0);
            cursor.advance(scanned, chunk);
            Ok(ScanOutcome {
                scanned,
                transitioned,
                locked: 0,
            })
        })
    }
}

impl Store for InMemoryStore {
    fn save_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut events = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        events.insert(event.id().clone(), event.clone());
        Ok(())
    }

    fn append_event(
        &self,
        trigger: &TriggerDefinition,
        event: &Event,
        trait_dict: &IdentifyingTraitDict,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        self.with_bucket(trigger.name(), |bucket| {
            let existing = bucket.streams.values_mut().find(|stream| {
                stream.state() == StreamState::Collecting && stream.matches_signature(trait_dict)
            });

            let (stream_id, is_new) = if let Some(stream) = existing {
                stream.touch(now);
                (stream.stream_id().clone(), false)
            } else {
                let stream_id = StreamId::new(Uuid::new_v4().to_string());
                let stream = Stream::new(stream_id.clone(), trigger.name().clone(), trait_dict.clone(), now);
                bucket.streams.insert(stream_id.clone(), stream);
                (stream_id, true)
            };

            bucket
                .memberships
                .entry(stream_id)
                .or_default()
                .push(event.id().clone());
            Ok(is_new)
        })
    }

    fn do_trigger_check(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
        now: Timestamp,
    ) -> Result<ScanOutcome, StoreError> {
        let debugger = crate::core::debugger::Debugger::new(trigger.name().clone());
        self.scan_state(
            trigger,
            cursor,
            chunk,
            |stream, now| {
                if stream.state() != StreamState::Collecting {
                    return Ok(false);
                }
                if trigger.criterion().should_fire(stream, None, &debugger, now) {
                    stream.transition_to(StreamState::Ready);
                    return Ok(true);
                }
                Ok(false)
            },
            now,
        )
    }

    fn process_ready_streams(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
        _now: Timestamp,
        on_claimed: &mut dyn FnMut(Stream) -> Result<(), StoreError>,
    ) -> Result<ScanOutcome, StoreError> {
        let claimed_ids: Vec<StreamId> = self.with_bucket(trigger.name(), |bucket| {
            let mut ready: Vec<&mut Stream> = bucket
                .streams
                .values_mut()
                .filter(|s| s.state() == StreamState::Ready)
                .collect();
            ready.sort_by_key(|s| s.last_update());

            let start = usize::try_from(cursor.offset()).unwrap_or(0).min(ready.len());
            let end = if chunk <= 0 {
                ready.len()
            } else {
                let window = usize::try_from(chunk).unwrap_or(ready.len());
                (start + window).min(ready.len())
            };
            let scanned = i64::try_from(end - start).unwrap_or(0);
            cursor.advance(scanned, chunk);

            let mut claimed = Vec::new();
            for stream in &mut ready[start..end] {
                stream.transition_to(StreamState::Triggered);
                claimed.push(stream.stream_id().clone());
            }
            claimed
        });

        let mut transitioned = 0i64;
        for stream_id in &claimed_ids {
            let stream = self.with_bucket(trigger.name(), |bucket| bucket.streams.get(stream_id).cloned());
            if let Some(mut stream) = stream {
                let events = self.load_events(stream_id)?;
                stream.set_events(events);
                on_claimed(stream)?;
                transitioned += 1;
            }
        }

        Ok(ScanOutcome {
            scanned: i64::try_from(claimed_ids.len()).unwrap_or(0),
            transitioned,
            locked: 0,
        })
    }

    fn purge_processed_streams(
        &self,
        trigger: &TriggerDefinition,
        cursor: &mut CursorState,
        chunk: i64,
    ) -> Result<ScanOutcome, StoreError> {
        let now = Timestamp::now();
        self.scan_state(
            trigger,
            cursor,
            chunk,
            |_stream, _now| Ok(false),
            now,
        )?;
        let removed = self.with_bucket(trigger.name(), |bucket| {
            let to_remove: Vec<StreamId> = bucket
                .streams
                .values()
                .filter(|s| s.state() == StreamState::Processed)
                .map(|s| s.stream_id().clone())
                .collect();
            for stream_id in &to_remove {
                bucket.streams.remove(stream_id);
            }
            i64::try_from(to_remove.len()).unwrap_or(0)
        });
        Ok(ScanOutcome {
            scanned: removed,
            transitioned: removed,
            locked: 0,
        })
    }

    fn load_events(&self, stream_id: &StreamId) -> Result<Vec<Event>, StoreError> {
        let events = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut member_ids = Vec::new();
        for bucket in buckets.values() {
            let bucket = bucket.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(ids) = bucket.memberships.get(stream_id) {
                member_ids = ids.clone();
                break;
            }
        }
        let mut loaded: Vec<Event> = member_ids
            .into_iter()
            .filter_map(|id| events.get(&id).cloned())
            .collect();
        loaded.sort_by_key(Event::timestamp_key);
        Ok(loaded)
    }

    fn ready(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        self.transition_any(stream_id, StreamState::Ready)
    }

    fn trigger(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        self.transition_any(stream_id, StreamState::Triggered)
    }

    fn processed(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        self.transition_any(stream_id, StreamState::Processed)
    }

    fn error(&self, stream_id: &StreamId, message: &str) -> Result<(), StoreError> {
        self.mutate_any(stream_id, |s| s.mark_error(message))
    }

    fn commit_error(&self, stream_id: &StreamId, message: &str) -> Result<(), StoreError> {
        self.mutate_any(stream_id, |s| s.mark_commit_error(message))
    }

    fn get_num_active_streams(&self, trigger_name: &TriggerName) -> Result<u64, StoreError> {
        Ok(self.with_bucket(trigger_name, |bucket| bucket.streams.len() as u64))
    }

    fn find_streams(
        &self,
        state: StreamState,
        trigger_name: Option<&TriggerName>,
    ) -> Result<Vec<Stream>, StoreError> {
        let buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut found = Vec::new();
        for (name, bucket) in buckets.iter() {
            if let Some(wanted) = trigger_name {
                if wanted != name {
                    continue;
                }
            }
            let bucket = bucket.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            found.extend(bucket.streams.values().filter(|s| s.state() == state).cloned());
        }
        Ok(found)
    }

    fn get_stream(&self, stream_id: &StreamId, with_events: bool) -> Result<Option<Stream>, StoreError> {
        let buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for bucket in buckets.values() {
            let bucket = bucket.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(stream) = bucket.streams.get(stream_id) {
                let mut stream = stream.clone();
                drop(bucket);
                if with_events {
                    stream.set_events(self.load_events(stream_id)?);
                }
                return Ok(Some(stream));
            }
        }
        Ok(None)
    }

    fn flush_all(&self) -> Result<(), StoreError> {
        self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
        self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
        Ok(())
    }
}

impl InMemoryStore {
    fn transition_any(&self, stream_id: &StreamId, state: StreamState) -> Result<(), StoreError> {
        self.mutate_any(stream_id, |s| s.transition_to(state))
    }

    fn mutate_any(&self, stream_id: &StreamId, f: impl FnOnce(&mut Stream)) -> Result<(), StoreError> {
        let buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for bucket in buckets.values() {
            let mut bucket = bucket.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(stream) = bucket.streams.get_mut(stream_id) {
                f(stream);
                return Ok(());
            }
        }
        Err(StoreError::UnknownStream(stream_id.clone()))
    }
}
