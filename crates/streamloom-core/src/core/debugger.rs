//! Per-trigger counters for applicability, firing, and error statistics.

use std::collections::HashMap;
use std::sync::Mutex;

use super::identifiers::TriggerName;

#[derive(Debug, Default)]
struct Counters {
    trait_match: u64,
    trait_mismatch: u64,
    new_streams: u64,
    criteria_match: u64,
    criteria_mismatch: u64,
    mismatch_reasons: HashMap<String, u64>,
    trigger_errors: u64,
    commit_errors: u64,
    locked: u64,
}

/// Observability counters for one [`crate::core::trigger_definition::TriggerDefinition`].
///
/// All counters are behind a single mutex; contention is expected to be
/// negligible relative to the Store call each event already makes.
#[derive(Debug)]
pub struct Debugger {
    name: TriggerName,
    counters: Mutex<Counters>,
}

impl Debugger {
    /// Builds a debugger for the named trigger, with all counters at zero.
    pub fn new(name: impl Into<TriggerName>) -> Self {
        Self {
            name: name.into(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// The trigger this debugger tracks.
    #[must_use]
    pub fn trigger_name(&self) -> &TriggerName {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Records that an event's fields satisfied a trigger's identifying
    /// paths.
    pub fn trait_match(&self) {
        self.lock().trait_match += 1;
    }

    /// Records that an event's fields did not satisfy a trigger's
    /// identifying paths.
    pub fn trait_mismatch(&self) {
        self.lock().trait_mismatch += 1;
    }

    /// Records that an append created a brand new stream.
    pub fn new_stream(&self) {
        self.lock().new_streams += 1;
    }

    /// Records the outcome of one criterion evaluation, returning it
    /// unchanged so callers can fold recording into the return expression.
    pub fn check(&self, matched: bool, reason: &str) -> bool {
        let mut counters = self.lock();
        if matched {
            counters.criteria_match += 1;
        } else {
            counters.criteria_mismatch += 1;
            *counters.mismatch_reasons.entry(reason.to_string()).or_insert(0) += 1;
        }
        matched
    }

    /// Records that an `on_trigger` callback raised.
    pub fn trigger_error(&self) {
        self.lock().trigger_errors += 1;
    }

    /// Records that a `commit` callback raised.
    pub fn commit_error(&self) {
        self.lock().commit_errors += 1;
    }

    /// Records that a claim CAS lost to another worker.
    pub fn locked(&self) {
        self.lock().locked += 1;
    }

    /// A point-in-time snapshot of every counter, for the `errors`/status
    /// surfaces and for tests.
    #[must_use]
    pub fn snapshot(&self) -> DebuggerSnapshot {
        let counters = self.lock();
        DebuggerSnapshot {
            trait_match: counters.trait_match,
            trait_mismatch: counters.trait_mismatch,
            new_streams: counters.new_streams,
            criteria_match: counters.criteria_match,
            criteria_mismatch: counters.criteria_mismatch,
            trigger_errors: counters.trigger_errors,
            commit_errors: counters.commit_errors,
            locked: counters.locked,
        }
    }

    /// Resets every counter to zero, as done after a dump in the reference
    /// implementation.
    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }
}

/// An immutable copy of a [`Debugger`]'s counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebuggerSnapshot {
    /// Events whose fields satisfied this trigger's identifying paths.
    pub trait_match: u64,
    /// Events whose fields did not satisfy this trigger's identifying paths.
    pub trait_mismatch: u64,
    /// Streams created by an append to this trigger.
    pub new_streams: u64,
    /// Criterion evaluations that matched.
    pub criteria_match: u64,
    /// Criterion evaluations that did not match.
    pub criteria_mismatch: u64,
    /// `on_trigger` callback failures.
    pub trigger_errors: u64,
    /// `commit` callback failures.
    pub commit_errors: u64,
    /// Claim attempts that lost the compare-and-swap race.
    pub locked: u64,
}

#[cfg(test)]
mod tests {
    use super::Debugger;

    #[test]
    fn check_records_match_and_mismatch() {
        let debugger = Debugger::new("t1");
        assert!(debugger.check(true, "ok"));
        assert!(!debugger.check(false, "bad"));
        let snapshot = debugger.snapshot();
        assert_eq!(snapshot.criteria_match, 1);
        assert_eq!(snapshot.criteria_mismatch, 1);
    }

    #[test]
    fn reset_clears_counters() {
        let debugger = Debugger::new("t1");
        debugger.trait_match();
        debugger.reset();
        assert_eq!(debugger.snapshot().trait_match, 0);
    }
}
