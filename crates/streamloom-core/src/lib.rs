//! streamloom-core
//! ============================================================================
//! Module: Core Domain Crate
//! Description: Event/Stream/Criterion/TriggerDefinition domain types, the
//!              Store persistence trait, and the in-memory backend,
//!              pipeline facade, callback host, and periodic scheduler.
//! Purpose: Backend-agnostic event-stream correlation and triggering engine.
//! Dependencies: serde, serde_json, thiserror, time, tracing, uuid
//! ============================================================================

pub mod core;
pub mod errors;
pub mod interfaces;
pub mod runtime;

pub use core::{
    And, Criterion, Debugger, DebuggerSnapshot, EndOfDayExists, Event, EventId, EventType,
    IdentifyingTraitDict, Inactive, Stream, StreamId, StreamState, Timestamp, TriggerDefinition,
    TriggerName,
};
pub use errors::{BadEvent, PipelineError, StoreError};
pub use interfaces::{scrub_keys, unscrub_keys, CursorState, ScanOutcome, Store};
pub use runtime::{run_pipeline_callbacks, CallbackFailure, InMemoryStore, Pipeline, PipelineCallback, Role, Scheduler, Scratchpad};
