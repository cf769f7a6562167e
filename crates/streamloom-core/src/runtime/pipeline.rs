//! The thin facade ingestion and periodic workers call through: owns a
//! [`Store`] handle, a trigger set, and per-worker cursor state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::debugger::Debugger;
use crate::core::event::Event;
use crate::core::identifiers::TriggerName;
use crate::core::time::Timestamp;
use crate::core::trigger_definition::TriggerDefinition;
use crate::errors::{BadEvent, PipelineError};
use crate::interfaces::{CursorState, ScanOutcome, Store};
use crate::runtime::callback_host::run_pipeline_callbacks;

/// The thin object every CLI role and test harness drives.
///
/// `AddEvent` is stateless with respect to cursors; the three periodic
/// operations each carry their own [`CursorState`], since a worker that
/// performs more than one role keeps independent progress per role.
pub struct Pipeline {
    store: Arc<dyn Store>,
    triggers: Vec<Arc<TriggerDefinition>>,
    debuggers: HashMap<TriggerName, Arc<Debugger>>,
    trigger_check_cursor: CursorState,
    ready_cursor: CursorState,
    purge_cursor: CursorState,
}

impl Pipeline {
    /// Builds a pipeline over `store` for the given trigger set.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, triggers: Vec<Arc<TriggerDefinition>>) -> Self {
        let debuggers = triggers
            .iter()
            .map(|t| (t.name().clone(), Arc::new(Debugger::new(t.name().clone()))))
            .collect();
        Self {
            store,
            triggers,
            debuggers,
            trigger_check_cursor: CursorState::new(),
            ready_cursor: CursorState::new(),
            purge_cursor: CursorState::new(),
        }
    }

    /// The configured trigger definitions.
    #[must_use]
    pub fn triggers(&self) -> &[Arc<TriggerDefinition>] {
        &self.triggers
    }

    /// Per-trigger debug counters, keyed by trigger name.
    #[must_use]
    pub fn debuggers(&self) -> &HashMap<TriggerName, Arc<Debugger>> {
        &self.debuggers
    }

    fn debugger_for(&self, trigger: &TriggerDefinition) -> &Arc<Debugger> {
        self.debuggers
            .get(trigger.name())
            .unwrap_or_else(|| unreachable!("every configured trigger has a debugger"))
    }

    /// Ingests one event: persists it, then for each applicable trigger
    /// finds-or-creates its stream and appends the event-id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BadEvent`] if `fields` has no usable
    /// `_unique_id`, or [`PipelineError::Store`] if the store fails.
    pub fn add_event(&self, fields: serde_json::Value) -> Result<(), PipelineError> {
        let event = Event::from_value(fields).map_err(BadEvent::from)?;
        self.store.save_event(&event)?;

        for trigger in &self.triggers {
            let debugger = self.debugger_for(trigger);
            if !trigger.applies(&event) {
                debugger.trait_mismatch();
                continue;
            }
            debugger.trait_match();

            let trait_dict = trigger.get_identifying_trait_dict(&event);
            let is_new = self
                .store
                .append_event(trigger, &event, &trait_dict, Timestamp::now())?;
            if is_new {
                debugger.new_stream();
            }
        }
        Ok(())
    }

    /// Runs one trigger-check pass across every configured trigger.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if any trigger's scan fails.
    pub fn do_trigger_check(&mut self, chunk: i64, now: Timestamp) -> Result<ScanOutcome, PipelineError> {
        let mut total = ScanOutcome::default();
        for trigger in self.triggers.clone() {
            let outcome = self
                .store
                .do_trigger_check(&trigger, &mut self.trigger_check_cursor, chunk, now)?;
            total.scanned += outcome.scanned;
            total.transitioned += outcome.transitioned;
        }
        Ok(total)
    }

    /// Runs one ready-stream claim pass across every configured trigger,
    /// invoking the callback host on every stream this worker claims.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if any trigger's scan, claim, or
    /// callback-triggered state transition fails.
    pub fn process_ready_streams(&mut self, chunk: i64, now: Timestamp) -> Result<ScanOutcome, PipelineError> {
        let mut total = ScanOutcome::default();
        for trigger in self.triggers.clone() {
            let debugger = Arc::clone(self.debugger_for(&trigger));
            let store = Arc::clone(&self.store);
            let trigger_for_closure = Arc::clone(&trigger);
            let outcome = self.store.process_ready_streams(
                &trigger,
                &mut self.ready_cursor,
                chunk,
                now,
                &mut |stream| run_pipeline_callbacks(&trigger_for_closure, &stream, &debugger, store.as_ref()),
            )?;
            total.scanned += outcome.scanned;
            total.transitioned += outcome.transitioned;
            total.locked += outcome.locked;
            for _ in 0..outcome.locked {
                debugger.locked();
            }
        }
        Ok(total)
    }

    /// Runs one purge pass across every configured trigger.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if any trigger's purge fails.
    pub fn purge_streams(&mut self, chunk: i64) -> Result<ScanOutcome, PipelineError> {
        let mut total = ScanOutcome::default();
        for trigger in self.triggers.clone() {
            let outcome = self.store.purge_processed_streams(&trigger, &mut self.purge_cursor, chunk)?;
            total.scanned += outcome.scanned;
            total.transitioned += outcome.transitioned;
        }
        Ok(total)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]
mod tests {
    use std::sync::Arc;

    use super::Pipeline;
    use crate::core::event::Event;
    use crate::core::identifiers::{StreamId, TriggerName};
    use crate::core::stream::{IdentifyingTraitDict, Stream, StreamState};
    use crate::core::time::Timestamp;
    use crate::core::trigger_definition::TriggerDefinition;
    use crate::core::Inactive;
    use crate::errors::StoreError;
    use crate::interfaces::{CursorState, ScanOutcome, Store};
    use crate::runtime::memory::InMemoryStore;

    /// Wraps [`InMemoryStore`] and reports a fixed `locked` count from
    /// `process_ready_streams`, regardless of what actually happened, so
    /// callers of the pipeline facade can be tested against a claim-race
    /// outcome without needing a real concurrent CAS backend.
    struct LockedClaimStore {
        inner: InMemoryStore,
        reported_locked: i64,
    }

    impl Store for LockedClaimStore {
        fn save_event(&self, event: &Event) -> Result<(), StoreError> {
            self.inner.save_event(event)
        }

        fn append_event(
            &self,
            trigger: &TriggerDefinition,
            event: &Event,
            trait_dict: &IdentifyingTraitDict,
            now: Timestamp,
        ) -> Result<bool, StoreError> {
            self.inner.append_event(trigger, event, trait_dict, now)
        }

        fn do_trigger_check(
            &self,
            trigger: &TriggerDefinition,
            cursor: &mut CursorState,
            chunk: i64,
            now: Timestamp,
        ) -> Result<ScanOutcome, StoreError> {
            self.inner.do_trigger_check(trigger, cursor, chunk, now)
        }

        fn process_ready_streams(
            &self,
            trigger: &TriggerDefinition,
            cursor: &mut CursorState,
            chunk: i64,
            now: Timestamp,
            on_claimed: &mut dyn FnMut(Stream) -> Result<(), StoreError>,
        ) -> Result<ScanOutcome, StoreError> {
            let mut outcome = self.inner.process_ready_streams(trigger, cursor, chunk, now, on_claimed)?;
            outcome.locked = self.reported_locked;
            Ok(outcome)
        }

        fn purge_processed_streams(
            &self,
            trigger: &TriggerDefinition,
            cursor: &mut CursorState,
            chunk: i64,
        ) -> Result<ScanOutcome, StoreError> {
            self.inner.purge_processed_streams(trigger, cursor, chunk)
        }

        fn load_events(&self, stream_id: &StreamId) -> Result<Vec<Event>, StoreError> {
            self.inner.load_events(stream_id)
        }

        fn ready(&self, stream_id: &StreamId) -> Result<(), StoreError> {
            self.inner.ready(stream_id)
        }

        fn trigger(&self, stream_id: &StreamId) -> Result<(), StoreError> {
            self.inner.trigger(stream_id)
        }

        fn processed(&self, stream_id: &StreamId) -> Result<(), StoreError> {
            self.inner.processed(stream_id)
        }

        fn error(&self, stream_id: &StreamId, message: &str) -> Result<(), StoreError> {
            self.inner.error(stream_id, message)
        }

        fn commit_error(&self, stream_id: &StreamId, message: &str) -> Result<(), StoreError> {
            self.inner.commit_error(stream_id, message)
        }

        fn get_num_active_streams(&self, trigger_name: &TriggerName) -> Result<u64, StoreError> {
            self.inner.get_num_active_streams(trigger_name)
        }

        fn find_streams(
            &self,
            state: StreamState,
            trigger_name: Option<&TriggerName>,
        ) -> Result<Vec<Stream>, StoreError> {
            self.inner.find_streams(state, trigger_name)
        }

        fn get_stream(&self, stream_id: &StreamId, with_events: bool) -> Result<Option<Stream>, StoreError> {
            self.inner.get_stream(stream_id, with_events)
        }

        fn flush_all(&self) -> Result<(), StoreError> {
            self.inner.flush_all()
        }
    }

    #[test]
    fn add_event_rejects_missing_unique_id() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(store, Vec::new());
        let err = pipeline.add_event(serde_json::json!({"request_id": "A"}));
        assert!(err.is_err());
    }

    #[test]
    fn inactive_trigger_end_to_end() {
        let store: Arc<dyn crate::interfaces::Store> = Arc::new(InMemoryStore::new());
        let trigger = Arc::new(TriggerDefinition::new(
            TriggerName::new("t1"),
            vec!["request_id".to_string()],
            Box::new(Inactive::new(60)),
            Vec::new(),
        ));
        let mut pipeline = Pipeline::new(store, vec![trigger]);

        let created_at = Timestamp::now();
        pipeline
            .add_event(serde_json::json!({"_unique_id": "1", "request_id": "A"}))
            .unwrap();

        let before = created_at.plus_seconds(30);
        pipeline.do_trigger_check(0, before).unwrap();

        let after = created_at.plus_seconds(61);
        let outcome = pipeline.do_trigger_check(0, after).unwrap();
        assert_eq!(outcome.transitioned, 1);
    }

    #[test]
    fn process_ready_streams_mirrors_locked_claims_onto_the_debugger() {
        let store: Arc<dyn crate::interfaces::Store> = Arc::new(LockedClaimStore {
            inner: InMemoryStore::new(),
            reported_locked: 3,
        });
        let trigger = Arc::new(TriggerDefinition::new(
            TriggerName::new("t1"),
            vec!["request_id".to_string()],
            Box::new(Inactive::new(-1)),
            Vec::new(),
        ));
        let mut pipeline = Pipeline::new(store, vec![Arc::clone(&trigger)]);

        let outcome = pipeline.process_ready_streams(0, Timestamp::now()).unwrap();

        assert_eq!(outcome.locked, 3);
        let snapshot = pipeline.debuggers().get(trigger.name()).unwrap().snapshot();
        assert_eq!(snapshot.locked, 3);
    }
}
