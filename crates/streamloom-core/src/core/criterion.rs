//! Firing predicates evaluated against a stream and (optionally) its most
//! recent event.

use super::debugger::Debugger;
use super::event::Event;
use super::stream::Stream;
use super::time::Timestamp;

/// A side-effect-free predicate over `(stream, last_event, now)` deciding
/// whether a stream should fire.
///
/// Evaluation is expected to be cheap: `should_fire` runs on every append
/// and on every periodic scan.
pub trait Criterion: Send + Sync {
    /// Evaluates the predicate. `last_event` is `None` during periodic
    /// sweeps, where no single event triggered the check.
    fn should_fire(
        &self,
        stream: &Stream,
        last_event: Option<&Event>,
        debugger: &Debugger,
        now: Timestamp,
    ) -> bool;
}

/// Fires once a stream has seen no new events for `expiry_in_seconds`.
///
/// This is the main aging criterion: it is evaluated during periodic
/// sweeps where `last_event` is absent, as well as on append.
#[derive(Debug, Clone, Copy)]
pub struct Inactive {
    expiry_in_seconds: i64,
}

impl Inactive {
    /// Builds an `Inactive` criterion with the given expiry, in seconds.
    #[must_use]
    pub const fn new(expiry_in_seconds: i64) -> Self {
        Self { expiry_in_seconds }
    }
}

impl Criterion for Inactive {
    fn should_fire(
        &self,
        stream: &Stream,
        _last_event: Option<&Event>,
        debugger: &Debugger,
        now: Timestamp,
    ) -> bool {
        let elapsed = stream.last_update().seconds_until(now);
        debugger.check(elapsed > self.expiry_in_seconds, "inactive: not yet expired")
    }
}

/// Fires when the most recent event's `event_type` matches exactly.
///
/// Never fires during a periodic sweep, since no `last_event` is supplied
/// there.
#[derive(Debug, Clone)]
pub struct EventType {
    event_type: String,
}

impl EventType {
    /// Builds an `EventType` criterion matching the given type name.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
        }
    }
}

impl Criterion for EventType {
    fn should_fire(
        &self,
        _stream: &Stream,
        last_event: Option<&Event>,
        debugger: &Debugger,
        _now: Timestamp,
    ) -> bool {
        let Some(event) = last_event else {
            return debugger.check(false, "event_type: no last event");
        };
        let matched = event.event_type() == Some(self.event_type.as_str());
        debugger.check(matched, "event_type: mismatch")
    }
}

/// Conjunction of an ordered list of criteria.
///
/// Every criterion is evaluated (short-circuiting is allowed but every
/// mismatch is still reported to the debugger for diagnostics), and the
/// result is the logical AND of all of them.
pub struct And {
    criteria: Vec<Box<dyn Criterion>>,
}

impl And {
    /// Builds a conjunction over the given criteria, in evaluation order.
    #[must_use]
    pub fn new(criteria: Vec<Box<dyn Criterion>>) -> Self {
        Self { criteria }
    }
}

impl Criterion for And {
    fn should_fire(
        &self,
        stream: &Stream,
        last_event: Option<&Event>,
        debugger: &Debugger,
        now: Timestamp,
    ) -> bool {
        let mut all_matched = true;
        for criterion in &self.criteria {
            if !criterion.should_fire(stream, last_event, debugger, now) {
                all_matched = false;
            }
        }
        all_matched
    }
}

/// Fires when the most recent event represents the end of a full audit day:
/// its type matches `exists_name`, it carries `payload.audit_period_beginning`
/// and `payload.audit_period_ending`, both parse as timestamps, and both
/// land exactly on a midnight boundary.
#[derive(Debug, Clone)]
pub struct EndOfDayExists {
    exists_name: String,
}

impl EndOfDayExists {
    /// Builds an `EndOfDayExists` criterion matching the given event type.
    pub fn new(exists_name: impl Into<String>) -> Self {
        Self {
            exists_name: exists_name.into(),
        }
    }

    fn audit_period_is_full_day(event: &Event) -> bool {
        let Some(payload) = event.field("payload") else {
            return false;
        };
        let begin = payload
            .get("audit_period_beginning")
            .and_then(serde_json::Value::as_str);
        let end = payload
            .get("audit_period_ending")
            .and_then(serde_json::Value::as_str);
        let (Some(begin), Some(end)) = (begin, end) else {
            return false;
        };
        let (Ok(begin), Ok(end)) = (Timestamp::parse_rfc3339(begin), Timestamp::parse_rfc3339(end))
        else {
            return false;
        };
        begin.is_midnight() && end.is_midnight()
    }
}

impl Criterion for EndOfDayExists {
    fn should_fire(
        &self,
        _stream: &Stream,
        last_event: Option<&Event>,
        debugger: &Debugger,
        _now: Timestamp,
    ) -> bool {
        let Some(event) = last_event else {
            return debugger.check(false, "end_of_day: no last event available");
        };
        if event.event_type() != Some(self.exists_name.as_str()) {
            return debugger.check(false, "end_of_day: event type mismatch");
        }
        debugger.check(Self::audit_period_is_full_day(event), "end_of_day: not a full day")
    }
}
