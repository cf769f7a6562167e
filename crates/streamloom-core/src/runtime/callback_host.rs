//! Two-phase prepare/commit invocation of a trigger's pipeline callbacks.

use std::collections::HashMap;
use std::fmt;

use crate::core::debugger::Debugger;
use crate::core::stream::Stream;
use crate::core::trigger_definition::TriggerDefinition;
use crate::errors::StoreError;
use crate::interfaces::Store;

/// Per-invocation context shared only across the callbacks of one claimed
/// stream. Never persisted across invocations.
pub type Scratchpad = HashMap<String, serde_json::Value>;

/// One stage of a trigger's pipeline.
///
/// `on_trigger` stages durable side-effects; `commit` flushes them. A
/// failure in either phase aborts the remaining callbacks in that phase
/// and leaves the stream in an error state rather than retrying.
pub trait PipelineCallback: Send + Sync {
    /// The prepare phase. Implementations that cannot tolerate being
    /// retried without de-duplication must implement their own
    /// idempotency token inside `scratchpad`.
    ///
    /// # Errors
    ///
    /// Any `Err` aborts this stream's remaining `on_trigger` calls and
    /// every `commit` call; the stream moves to `Error`.
    fn on_trigger(&self, stream: &Stream, scratchpad: &mut Scratchpad) -> Result<(), CallbackFailure>;

    /// The commit phase, run only once every `on_trigger` succeeded.
    ///
    /// # Errors
    ///
    /// Any `Err` aborts the remaining `commit` calls; the stream moves to
    /// `CommitError`, the dangerous class, since earlier callbacks'
    /// prepare-phase side effects may already be visible.
    fn commit(&self, stream: &Stream, scratchpad: &mut Scratchpad) -> Result<(), CallbackFailure>;
}

/// The error a [`PipelineCallback`] reports from either phase.
#[derive(Debug)]
pub struct CallbackFailure(String);

impl CallbackFailure {
    /// Wraps any displayable error as a callback failure.
    pub fn new(message: impl fmt::Display) -> Self {
        Self(message.to_string())
    }
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CallbackFailure {}

/// Runs a claimed stream's pipeline callbacks through the two-phase
/// protocol and applies the resulting state transition via `store`.
///
/// This is the sole caller of [`PipelineCallback::on_trigger`]/[`PipelineCallback::commit`]:
/// [`crate::interfaces::Store::process_ready_streams`] implementations
/// hand each successfully claimed stream to this function.
///
/// # Errors
///
/// Returns [`StoreError`] only if the final state-transition call to
/// `store` fails; callback failures are recovered in place (the stream is
/// left in `Error` or `CommitError`) and do not propagate.
pub fn run_pipeline_callbacks(
    trigger: &TriggerDefinition,
    stream: &Stream,
    debugger: &Debugger,
    store: &dyn Store,
) -> Result<(), StoreError> {
    let mut scratchpad = Scratchpad::new();

    for callback in trigger.pipeline_callbacks() {
        if let Err(failure) = callback.on_trigger(stream, &mut scratchpad) {
            debugger.trigger_error();
            return store.error(stream.stream_id(), &failure.to_string());
        }
    }

    for callback in trigger.pipeline_callbacks() {
        if let Err(failure) = callback.commit(stream, &mut scratchpad) {
            debugger.commit_error();
            return store.commit_error(stream.stream_id(), &failure.to_string());
        }
    }

    store.processed(stream.stream_id())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{run_pipeline_callbacks, CallbackFailure, PipelineCallback, Scratchpad};
    use crate::core::debugger::Debugger;
    use crate::core::identifiers::TriggerName;
    use crate::core::stream::Stream;
    use crate::core::time::Timestamp;
    use crate::core::trigger_definition::TriggerDefinition;
    use crate::interfaces::Store;
    use crate::core::Inactive;
    use crate::runtime::memory::InMemoryStore;

    struct RecordingCallback {
        fail_on_trigger: bool,
        fail_on_commit: bool,
        trigger_calls: Arc<AtomicUsize>,
        commit_calls: Arc<AtomicUsize>,
    }

    impl PipelineCallback for RecordingCallback {
        fn on_trigger(&self, _stream: &Stream, _scratchpad: &mut Scratchpad) -> Result<(), CallbackFailure> {
            self.trigger_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_trigger {
                return Err(CallbackFailure::new("boom in on_trigger"));
            }
            Ok(())
        }

        fn commit(&self, _stream: &Stream, _scratchpad: &mut Scratchpad) -> Result<(), CallbackFailure> {
            self.commit_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_commit {
                return Err(CallbackFailure::new("boom in commit"));
            }
            Ok(())
        }
    }

    fn make_stream(store: &InMemoryStore, trigger: &TriggerDefinition) -> Stream {
        let now = Timestamp::now();
        let event = crate::core::event::Event::from_value(serde_json::json!({
            "_unique_id": "1",
            "request_id": "A"
        }))
        .unwrap();
        store.save_event(&event).unwrap();
        let dict = trigger.get_identifying_trait_dict(&event);
        store.append_event(trigger, &event, &dict, now).unwrap();
        let mut cursor = crate::interfaces::CursorState::new();
        store.do_trigger_check(trigger, &mut cursor, 0, Timestamp::now()).unwrap();
        let streams = store
            .find_streams(crate::core::StreamState::Collecting, Some(trigger.name()))
            .unwrap();
        assert!(streams.is_empty());
        let ready = store
            .find_streams(crate::core::StreamState::Ready, Some(trigger.name()))
            .unwrap();
        ready.into_iter().next().unwrap()
    }

    fn trigger_with(callback: RecordingCallback) -> TriggerDefinition {
        TriggerDefinition::new(
            TriggerName::new("t1"),
            vec!["request_id".to_string()],
            Box::new(Inactive::new(-1)),
            vec![Box::new(callback)],
        )
    }

    #[test]
    fn success_path_marks_processed() {
        use crate::interfaces::Store as _;
        let trigger_calls = Arc::new(AtomicUsize::new(0));
        let commit_calls = Arc::new(AtomicUsize::new(0));
        let trigger = trigger_with(RecordingCallback {
            fail_on_trigger: false,
            fail_on_commit: false,
            trigger_calls: trigger_calls.clone(),
            commit_calls: commit_calls.clone(),
        });
        let store = InMemoryStore::new();
        let stream = make_stream(&store, &trigger);
        let debugger = Debugger::new("t1");

        run_pipeline_callbacks(&trigger, &stream, &debugger, &store).unwrap();

        assert_eq!(trigger_calls.load(Ordering::SeqCst), 1);
        assert_eq!(commit_calls.load(Ordering::SeqCst), 1);
        let reloaded = store.get_stream(stream.stream_id(), false).unwrap().unwrap();
        assert_eq!(reloaded.state(), crate::core::StreamState::Processed);
    }

    #[test]
    fn trigger_failure_skips_commit_and_marks_error() {
        use crate::interfaces::Store as _;
        let trigger_calls = Arc::new(AtomicUsize::new(0));
        let commit_calls = Arc::new(AtomicUsize::new(0));
        let trigger = trigger_with(RecordingCallback {
            fail_on_trigger: true,
            fail_on_commit: false,
            trigger_calls: trigger_calls.clone(),
            commit_calls: commit_calls.clone(),
        });
        let store = InMemoryStore::new();
        let stream = make_stream(&store, &trigger);
        let debugger = Debugger::new("t1");

        run_pipeline_callbacks(&trigger, &stream, &debugger, &store).unwrap();

        assert_eq!(commit_calls.load(Ordering::SeqCst), 0);
        let reloaded = store.get_stream(stream.stream_id(), false).unwrap().unwrap();
        assert_eq!(reloaded.state(), crate::core::StreamState::Error);
        assert_eq!(debugger.snapshot().trigger_errors, 1);
    }

    #[test]
    fn commit_failure_marks_commit_error() {
        use crate::interfaces::Store as _;
        let trigger_calls = Arc::new(AtomicUsize::new(0));
        let commit_calls = Arc::new(AtomicUsize::new(0));
        let trigger = trigger_with(RecordingCallback {
            fail_on_trigger: false,
            fail_on_commit: true,
            trigger_calls: trigger_calls.clone(),
            commit_calls: commit_calls.clone(),
        });
        let store = InMemoryStore::new();
        let stream = make_stream(&store, &trigger);
        let debugger = Debugger::new("t1");

        run_pipeline_callbacks(&trigger, &stream, &debugger, &store).unwrap();

        let reloaded = store.get_stream(stream.stream_id(), false).unwrap().unwrap();
        assert_eq!(reloaded.state(), crate::core::StreamState::CommitError);
        assert_eq!(reloaded.commit_errors(), 1);
    }
}
