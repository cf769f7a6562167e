//! Domain types: events, streams, criteria, trigger definitions, and the
//! per-trigger debug counters.

pub mod criterion;
pub mod debugger;
pub mod event;
pub mod identifiers;
pub mod stream;
pub mod time;
pub mod trigger_definition;

pub use criterion::{And, Criterion, EndOfDayExists, EventType, Inactive};
pub use debugger::{Debugger, DebuggerSnapshot};
pub use event::Event;
pub use identifiers::{EventId, StreamId, TriggerName};
pub use stream::{IdentifyingTraitDict, Stream, StreamState};
pub use time::Timestamp;
pub use trigger_definition::TriggerDefinition;
