// streamloom-core/tests/scenarios.rs
// ============================================================================
// Module: End-to-End Pipeline Scenarios
// Description: Exercises the full ingest -> trigger-check -> ready-claim ->
//              callback cycle against the in-memory store.
// Purpose: Validate the documented lifecycle scenarios end to end.
// Dependencies: streamloom-core
// ============================================================================

//! End-to-end pipeline scenario tests for streamloom-core.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use streamloom_core::{
    CallbackFailure, Event, EventType, Inactive, InMemoryStore, Pipeline, PipelineCallback,
    Scratchpad, Stream, StreamState, Store, Timestamp, TriggerDefinition, TriggerName,
};

struct CountingCallback {
    on_trigger_calls: Arc<AtomicUsize>,
    commit_calls: Arc<AtomicUsize>,
    fail_on_trigger: bool,
    fail_on_commit: bool,
}

impl PipelineCallback for CountingCallback {
    fn on_trigger(&self, _stream: &Stream, _scratchpad: &mut Scratchpad) -> Result<(), CallbackFailure> {
        self.on_trigger_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_trigger {
            return Err(CallbackFailure::new("on_trigger exploded"));
        }
        Ok(())
    }

    fn commit(&self, _stream: &Stream, _scratchpad: &mut Scratchpad) -> Result<(), CallbackFailure> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_commit {
            return Err(CallbackFailure::new("commit exploded"));
        }
        Ok(())
    }
}

/// Scenario 1: `Inactive(60)` leaves a fresh stream Collecting at t=30 and
/// promotes it through Ready to Processed once 61 seconds have elapsed.
#[test]
fn inactive_fires_and_processes() {
    let on_trigger_calls = Arc::new(AtomicUsize::new(0));
    let commit_calls = Arc::new(AtomicUsize::new(0));
    let trigger = Arc::new(TriggerDefinition::new(
        TriggerName::new("inactive-60"),
        vec!["request_id".to_string()],
        Box::new(Inactive::new(60)),
        vec![Box::new(CountingCallback {
            on_trigger_calls: Arc::clone(&on_trigger_calls),
            commit_calls: Arc::clone(&commit_calls),
            fail_on_trigger: false,
            fail_on_commit: false,
        })],
    ));
    let mut pipeline = Pipeline::new(Arc::new(InMemoryStore::new()), vec![trigger]);

    let t0 = Timestamp::now();
    pipeline
        .add_event(json!({"_unique_id": "1", "request_id": "A"}))
        .expect("event admitted");

    pipeline.do_trigger_check(0, t0.plus_seconds(30)).expect("scan ok");
    pipeline.process_ready_streams(0, t0.plus_seconds(30)).expect("scan ok");
    assert_eq!(on_trigger_calls.load(Ordering::SeqCst), 0);

    pipeline.do_trigger_check(0, t0.plus_seconds(61)).expect("scan ok");
    let outcome = pipeline
        .process_ready_streams(0, t0.plus_seconds(61))
        .expect("scan ok");

    assert_eq!(outcome.transitioned, 1);
    assert_eq!(on_trigger_calls.load(Ordering::SeqCst), 1);
    assert_eq!(commit_calls.load(Ordering::SeqCst), 1);
}

/// Scenario 2: two identifying-trait values group into two independent
/// Collecting streams, with stream A's membership ordered by timestamp.
#[test]
fn two_requests_form_independent_streams() {
    let trigger = Arc::new(TriggerDefinition::new(
        TriggerName::new("grouping"),
        vec!["request_id".to_string()],
        Box::new(Inactive::new(3600)),
        Vec::new(),
    ));
    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::new(Arc::clone(&store) as Arc<dyn Store>, vec![Arc::clone(&trigger)]);

    pipeline
        .add_event(json!({"_unique_id": "1", "request_id": "A", "ts": 0}))
        .unwrap();
    pipeline
        .add_event(json!({"_unique_id": "2", "request_id": "B", "ts": 1}))
        .unwrap();
    pipeline
        .add_event(json!({"_unique_id": "3", "request_id": "A", "ts": 2}))
        .unwrap();

    let collecting = store.find_streams(StreamState::Collecting, Some(trigger.name())).unwrap();
    assert_eq!(collecting.len(), 2);

    let stream_a = collecting
        .iter()
        .find(|s| s.identifying_traits().get("request_id").and_then(|v| v.as_str()) == Some("A"))
        .unwrap();
    let events = store.load_events(stream_a.stream_id()).unwrap();
    let ids: Vec<&str> = events.iter().map(|e| e.id().as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);
}

/// Ordering (P3) holds for producers that label the timestamp field `when`
/// and carry it as an RFC 3339 string, not just the toy `ts` integer field,
/// and survives out-of-order arrival.
#[test]
fn stream_events_replay_in_when_field_order_even_when_appended_out_of_order() {
    let trigger = Arc::new(TriggerDefinition::new(
        TriggerName::new("when-ordering"),
        vec!["request_id".to_string()],
        Box::new(Inactive::new(3600)),
        Vec::new(),
    ));
    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::new(Arc::clone(&store) as Arc<dyn Store>, vec![Arc::clone(&trigger)]);

    pipeline
        .add_event(json!({"_unique_id": "2", "request_id": "A", "when": "2026-01-01T00:00:02Z"}))
        .unwrap();
    pipeline
        .add_event(json!({"_unique_id": "1", "request_id": "A", "when": "2026-01-01T00:00:01Z"}))
        .unwrap();
    pipeline
        .add_event(json!({"_unique_id": "3", "request_id": "A", "when": "2026-01-01T00:00:03Z"}))
        .unwrap();

    let collecting = store.find_streams(StreamState::Collecting, Some(trigger.name())).unwrap();
    assert_eq!(collecting.len(), 1);
    let events = store.load_events(collecting[0].stream_id()).unwrap();
    let ids: Vec<&str> = events.iter().map(|e| e.id().as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

/// Scenario 3: two concurrent `process_ready_streams` passes against one
/// Ready stream only let one worker run the callback.
#[test]
fn claim_race_allows_exactly_one_winner() {
    let on_trigger_calls = Arc::new(AtomicUsize::new(0));
    let commit_calls = Arc::new(AtomicUsize::new(0));
    let trigger = Arc::new(TriggerDefinition::new(
        TriggerName::new("claim-race"),
        vec!["request_id".to_string()],
        Box::new(Inactive::new(-1)),
        vec![Box::new(CountingCallback {
            on_trigger_calls: Arc::clone(&on_trigger_calls),
            commit_calls: Arc::clone(&commit_calls),
            fail_on_trigger: false,
            fail_on_commit: false,
        })],
    ));
    let store = Arc::new(InMemoryStore::new());
    let mut worker_a = Pipeline::new(Arc::clone(&store) as Arc<dyn Store>, vec![Arc::clone(&trigger)]);
    let mut worker_b = Pipeline::new(Arc::clone(&store) as Arc<dyn Store>, vec![Arc::clone(&trigger)]);

    worker_a
        .add_event(json!({"_unique_id": "1", "request_id": "A"}))
        .unwrap();
    let now = Timestamp::now();
    worker_a.do_trigger_check(0, now).unwrap();

    let outcome_a = worker_a.process_ready_streams(0, now).unwrap();
    let outcome_b = worker_b.process_ready_streams(0, now).unwrap();

    assert_eq!(on_trigger_calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome_a.transitioned + outcome_b.transitioned, 1);
}

/// Scenario 4: a trigger-phase failure lands the stream in `Error` without
/// ever invoking commit.
#[test]
fn trigger_phase_failure_lands_in_error() {
    let on_trigger_calls = Arc::new(AtomicUsize::new(0));
    let commit_calls = Arc::new(AtomicUsize::new(0));
    let trigger = Arc::new(TriggerDefinition::new(
        TriggerName::new("trigger-fail"),
        vec!["request_id".to_string()],
        Box::new(Inactive::new(-1)),
        vec![Box::new(CountingCallback {
            on_trigger_calls: Arc::clone(&on_trigger_calls),
            commit_calls: Arc::clone(&commit_calls),
            fail_on_trigger: true,
            fail_on_commit: false,
        })],
    ));
    let store = Arc::new(InMemoryStore::new());
    let mut pipeline = Pipeline::new(Arc::clone(&store) as Arc<dyn Store>, vec![Arc::clone(&trigger)]);

    pipeline
        .add_event(json!({"_unique_id": "1", "request_id": "A"}))
        .unwrap();
    let now = Timestamp::now();
    pipeline.do_trigger_check(0, now).unwrap();
    pipeline.process_ready_streams(0, now).unwrap();

    assert_eq!(commit_calls.load(Ordering::SeqCst), 0);
    let streams = store.find_streams(StreamState::Error, Some(trigger.name())).unwrap();
    assert_eq!(streams.len(), 1);
    assert!(!streams[0].last_error().is_empty());
}

/// Scenario 5: a commit-phase failure lands the stream in `CommitError`
/// with `commit_errors == 1`.
#[test]
fn commit_phase_failure_lands_in_commit_error() {
    let on_trigger_calls = Arc::new(AtomicUsize::new(0));
    let commit_calls = Arc::new(AtomicUsize::new(0));
    let trigger = Arc::new(TriggerDefinition::new(
        TriggerName::new("commit-fail"),
        vec!["request_id".to_string()],
        Box::new(Inactive::new(-1)),
        vec![Box::new(CountingCallback {
            on_trigger_calls: Arc::clone(&on_trigger_calls),
            commit_calls: Arc::clone(&commit_calls),
            fail_on_trigger: false,
            fail_on_commit: true,
        })],
    ));
    let store = Arc::new(InMemoryStore::new());
    let mut pipeline = Pipeline::new(Arc::clone(&store) as Arc<dyn Store>, vec![Arc::clone(&trigger)]);

    pipeline
        .add_event(json!({"_unique_id": "1", "request_id": "A"}))
        .unwrap();
    let now = Timestamp::now();
    pipeline.do_trigger_check(0, now).unwrap();
    pipeline.process_ready_streams(0, now).unwrap();

    let streams = store.find_streams(StreamState::CommitError, Some(trigger.name())).unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].commit_errors(), 1);
}

/// Scenario 6: 250 eligible Collecting streams, scanned in chunks of 100,
/// wrap the cursor 100 -> 200 -> 0 and all transition to Ready exactly
/// once.
#[test]
fn chunked_scan_wraps_and_covers_every_stream() {
    let trigger = Arc::new(TriggerDefinition::new(
        TriggerName::new("chunked"),
        vec!["request_id".to_string()],
        Box::new(Inactive::new(-1)),
        Vec::new(),
    ));
    let store = Arc::new(InMemoryStore::new());
    let mut pipeline = Pipeline::new(Arc::clone(&store) as Arc<dyn Store>, vec![Arc::clone(&trigger)]);

    for i in 0..250 {
        pipeline
            .add_event(json!({"_unique_id": format!("e{i}"), "request_id": format!("r{i}")}))
            .unwrap();
    }

    let now = Timestamp::now();
    let mut total_transitioned = 0i64;
    for _ in 0..3 {
        let outcome = pipeline.do_trigger_check(100, now).unwrap();
        total_transitioned += outcome.transitioned;
    }

    assert_eq!(total_transitioned, 250);
    let ready = store.find_streams(StreamState::Ready, Some(trigger.name())).unwrap();
    assert_eq!(ready.len(), 250);
}

/// Property P6: wherever `applies` is true, `get_identifying_trait_dict`
/// resolves every declared path.
#[test]
fn applies_round_trip_resolves_every_path() {
    let trigger = TriggerDefinition::new(
        TriggerName::new("round-trip"),
        vec!["request_id".to_string(), "payload/instance_id".to_string()],
        Box::new(Inactive::new(60)),
        Vec::new(),
    );
    let event = Event::from_value(json!({
        "_unique_id": "1",
        "request_id": "A",
        "payload": {"instance_id": "i-1"}
    }))
    .unwrap();

    assert!(trigger.applies(&event));
    let dict = trigger.get_identifying_trait_dict(&event);
    assert_eq!(dict.len(), 2);
}

/// `EventType` never fires during a periodic sweep, where no last event is
/// supplied.
#[test]
fn event_type_criterion_is_never_periodic() {
    let on_trigger_calls = Arc::new(AtomicUsize::new(0));
    let commit_calls = Arc::new(AtomicUsize::new(0));
    let trigger = Arc::new(TriggerDefinition::new(
        TriggerName::new("event-type-only"),
        vec!["request_id".to_string()],
        Box::new(EventType::new("compute.instance.exists")),
        vec![Box::new(CountingCallback {
            on_trigger_calls: Arc::clone(&on_trigger_calls),
            commit_calls: Arc::clone(&commit_calls),
            fail_on_trigger: false,
            fail_on_commit: false,
        })],
    ));
    let store = Arc::new(InMemoryStore::new());
    let mut pipeline = Pipeline::new(Arc::clone(&store) as Arc<dyn Store>, vec![Arc::clone(&trigger)]);

    pipeline
        .add_event(json!({"_unique_id": "1", "request_id": "A", "event_type": "compute.instance.deleted"}))
        .unwrap();
    let now = Timestamp::now();
    let outcome = pipeline.do_trigger_check(0, now).unwrap();
    assert_eq!(outcome.transitioned, 0);
}
