//! Error taxonomy shared across the pipeline, callback host, and every
//! [`crate::interfaces::Store`] implementation.

use thiserror::Error;

use crate::core::identifiers::{StreamId, TriggerName};

/// An event was rejected before it could be persisted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("bad event: {reason}")]
pub struct BadEvent {
    reason: String,
}

impl BadEvent {
    /// An event's `_unique_id` field was missing, empty, or not a string.
    #[must_use]
    pub fn missing_unique_id() -> Self {
        Self {
            reason: "event has no _unique_id".to_string(),
        }
    }

    /// A human-readable description of the rejection.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The failure surface of a [`crate::interfaces::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing datastore could not be reached or returned an I/O error.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored document could not be decoded into its expected shape.
    #[error("stored document is corrupt: {0}")]
    Corrupt(String),

    /// A caller referenced a stream id that does not exist.
    #[error("unknown stream: {0}")]
    UnknownStream(StreamId),

    /// A caller referenced a trigger name that is not configured.
    #[error("unknown trigger: {0}")]
    UnknownTrigger(TriggerName),

    /// An argument failed validation before reaching the backend.
    #[error("invalid store request: {0}")]
    Invalid(String),
}

/// Top-level error returned by the [`crate::runtime::pipeline::Pipeline`]
/// facade.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The event could not be admitted; see [`BadEvent`].
    #[error(transparent)]
    BadEvent(#[from] BadEvent),

    /// The store failed while servicing the request; see [`StoreError`].
    #[error(transparent)]
    Store(#[from] StoreError),
}
