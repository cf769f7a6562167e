//! Newtype identifiers for events, streams, and trigger definitions.
//!
//! Every identifier wraps a plain `String` so callers can't accidentally
//! pass an event id where a stream id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The `_unique_id` field carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Wraps any string-like value as an `EventId`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The generated identity of a [`crate::core::stream::Stream`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Wraps any string-like value as a `StreamId`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The name of a configured [`crate::core::trigger_definition::TriggerDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerName(String);

impl TriggerName {
    /// Wraps any string-like value as a `TriggerName`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TriggerName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TriggerName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
