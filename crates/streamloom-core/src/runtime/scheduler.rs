//! The periodic driver that repeatedly invokes one of the pipeline's three
//! periodic passes on a configured interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::time::Timestamp;
use crate::errors::PipelineError;
use crate::interfaces::ScanOutcome;
use crate::runtime::pipeline::Pipeline;

/// Which periodic pass a [`Scheduler`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Runs [`Pipeline::do_trigger_check`].
    TriggerCheck,
    /// Runs [`Pipeline::process_ready_streams`].
    ReadyProcessor,
    /// Runs [`Pipeline::purge_streams`].
    Completed,
}

impl Role {
    const fn label(self) -> &'static str {
        match self {
            Self::TriggerCheck => "trigger_check",
            Self::ReadyProcessor => "ready_processor",
            Self::Completed => "completed",
        }
    }
}

/// A single-threaded cooperative loop: one pass runs to completion, then
/// the driver sleeps for the configured interval before the next pass.
///
/// Each process runs exactly one role; scaling a role means running more
/// processes, not more threads inside one `Scheduler`.
pub struct Scheduler {
    role: Role,
    chunk: i64,
    polling_rate: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Builds a scheduler for `role`, scanning `chunk` streams per pass and
    /// sleeping `polling_rate` between passes.
    #[must_use]
    pub fn new(role: Role, chunk: i64, polling_rate: Duration) -> Self {
        Self {
            role,
            chunk,
            polling_rate,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle that, when set, stops the loop after the in-flight pass
    /// completes. Intended to be wired to a process termination signal.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn run_pass(&self, pipeline: &mut Pipeline) -> Result<ScanOutcome, PipelineError> {
        let now = Timestamp::now();
        match self.role {
            Role::TriggerCheck => pipeline.do_trigger_check(self.chunk, now),
            Role::ReadyProcessor => pipeline.process_ready_streams(self.chunk, now),
            Role::Completed => pipeline.purge_streams(self.chunk),
        }
    }

    /// Runs exactly one pass, regardless of `--daemon`. Used by the
    /// one-shot CLI invocations and by tests.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the underlying pass fails.
    pub fn run_once(&self, pipeline: &mut Pipeline) -> Result<ScanOutcome, PipelineError> {
        self.run_pass(pipeline)
    }

    /// Runs passes forever, sleeping `polling_rate` between each, until the
    /// shutdown handle is set. Honors the termination signal only between
    /// passes: an in-flight pass always runs to completion first.
    ///
    /// A failed pass (store unavailability, most commonly) is logged and
    /// the loop continues on the next tick rather than exiting; the daemon
    /// only stops when the shutdown handle is set.
    ///
    /// # Errors
    ///
    /// This currently never returns `Err`; the `Result` is kept so a future
    /// unrecoverable condition can still surface one without an API break.
    pub fn run_daemon(&self, pipeline: &mut Pipeline) -> Result<(), PipelineError> {
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(err) = self.run_pass(pipeline) {
                tracing::warn!(error = %err, role = self.role.label(), "periodic pass failed; continuing on next tick");
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(self.polling_rate);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Role, Scheduler};
    use crate::core::identifiers::{StreamId, TriggerName};
    use crate::core::stream::{IdentifyingTraitDict, Stream, StreamState};
    use crate::core::time::Timestamp;
    use crate::core::trigger_definition::TriggerDefinition;
    use crate::core::{Criterion, Event};
    use crate::errors::StoreError;
    use crate::interfaces::{CursorState, ScanOutcome, Store};
    use crate::runtime::memory::InMemoryStore;
    use crate::runtime::pipeline::Pipeline;

    /// A [`Store`] double whose every operation fails, counting how many
    /// times a pass was attempted.
    struct FailingStore {
        attempts: AtomicUsize,
    }

    impl FailingStore {
        fn new() -> Self {
            Self { attempts: AtomicUsize::new(0) }
        }

        fn unavailable(&self) -> StoreError {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            StoreError::Unavailable("store offline".to_string())
        }
    }

    impl Store for FailingStore {
        fn save_event(&self, _event: &Event) -> Result<(), StoreError> {
            Err(self.unavailable())
        }

        fn append_event(
            &self,
            _trigger: &TriggerDefinition,
            _event: &Event,
            _trait_dict: &IdentifyingTraitDict,
            _now: Timestamp,
        ) -> Result<bool, StoreError> {
            Err(self.unavailable())
        }

        fn do_trigger_check(
            &self,
            _trigger: &TriggerDefinition,
            _cursor: &mut CursorState,
            _chunk: i64,
            _now: Timestamp,
        ) -> Result<ScanOutcome, StoreError> {
            Err(self.unavailable())
        }

        fn process_ready_streams(
            &self,
            _trigger: &TriggerDefinition,
            _cursor: &mut CursorState,
            _chunk: i64,
            _now: Timestamp,
            _on_claimed: &mut dyn FnMut(Stream) -> Result<(), StoreError>,
        ) -> Result<ScanOutcome, StoreError> {
            Err(self.unavailable())
        }

        fn purge_processed_streams(
            &self,
            _trigger: &TriggerDefinition,
            _cursor: &mut CursorState,
            _chunk: i64,
        ) -> Result<ScanOutcome, StoreError> {
            Err(self.unavailable())
        }

        fn load_events(&self, _stream_id: &StreamId) -> Result<Vec<Event>, StoreError> {
            Err(self.unavailable())
        }

        fn ready(&self, _stream_id: &StreamId) -> Result<(), StoreError> {
            Err(self.unavailable())
        }

        fn trigger(&self, _stream_id: &StreamId) -> Result<(), StoreError> {
            Err(self.unavailable())
        }

        fn processed(&self, _stream_id: &StreamId) -> Result<(), StoreError> {
            Err(self.unavailable())
        }

        fn error(&self, _stream_id: &StreamId, _message: &str) -> Result<(), StoreError> {
            Err(self.unavailable())
        }

        fn commit_error(&self, _stream_id: &StreamId, _message: &str) -> Result<(), StoreError> {
            Err(self.unavailable())
        }

        fn get_num_active_streams(&self, _trigger_name: &TriggerName) -> Result<u64, StoreError> {
            Err(self.unavailable())
        }

        fn find_streams(
            &self,
            _state: StreamState,
            _trigger_name: Option<&TriggerName>,
        ) -> Result<Vec<Stream>, StoreError> {
            Err(self.unavailable())
        }

        fn get_stream(&self, _stream_id: &StreamId, _with_events: bool) -> Result<Option<Stream>, StoreError> {
            Err(self.unavailable())
        }

        fn flush_all(&self) -> Result<(), StoreError> {
            Err(self.unavailable())
        }
    }

    struct AlwaysFires;

    impl Criterion for AlwaysFires {
        fn should_fire(
            &self,
            _stream: &Stream,
            _last_event: Option<&Event>,
            _debugger: &crate::core::debugger::Debugger,
            _now: Timestamp,
        ) -> bool {
            true
        }
    }

    #[test]
    fn run_once_executes_a_single_pass() {
        let store = Arc::new(InMemoryStore::new());
        let mut pipeline = Pipeline::new(store, Vec::new());
        let scheduler = Scheduler::new(Role::TriggerCheck, 0, Duration::from_secs(300));
        let outcome = scheduler.run_once(&mut pipeline).unwrap();
        assert_eq!(outcome.scanned, 0);
    }

    #[test]
    fn shutdown_handle_stops_the_daemon_loop() {
        let store = Arc::new(InMemoryStore::new());
        let mut pipeline = Pipeline::new(store, Vec::new());
        let scheduler = Scheduler::new(Role::Completed, 0, Duration::from_millis(1));
        let shutdown = scheduler.shutdown_handle();
        shutdown.store(true, Ordering::SeqCst);
        scheduler.run_daemon(&mut pipeline).unwrap();
    }

    #[test]
    fn run_daemon_logs_and_continues_past_a_failing_pass() {
        let store: Arc<dyn Store> = Arc::new(FailingStore::new());
        let trigger = Arc::new(TriggerDefinition::new(
            TriggerName::new("always-fires"),
            vec!["request_id".to_string()],
            Box::new(AlwaysFires),
            Vec::new(),
        ));
        let mut pipeline = Pipeline::new(store, vec![trigger]);
        let scheduler = Scheduler::new(Role::TriggerCheck, 0, Duration::from_millis(1));
        let shutdown = scheduler.shutdown_handle();

        let worker = std::thread::spawn(move || {
            scheduler.run_daemon(&mut pipeline).unwrap();
        });
        std::thread::sleep(Duration::from_millis(20));
        shutdown.store(true, Ordering::SeqCst);
        worker.join().unwrap();
    }
}
