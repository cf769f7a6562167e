//! An immutable, arbitrary-shaped event ingested from an external producer.

use serde_json::Value;

use super::identifiers::EventId;
use super::time::Timestamp;

/// The reserved field every event must carry: a caller-assigned identifier
/// unique across the lifetime of the pipeline.
pub const UNIQUE_ID_FIELD: &str = "_unique_id";

/// Field names tried, in order, when locating an event's ordering
/// timestamp. `when` is the upstream producer's name for this field;
/// `ts`/`timestamp` are accepted so callers that label it differently
/// still sort correctly.
const TIMESTAMP_FIELDS: &[&str] = &["when", "ts", "timestamp"];

/// A single event, as it arrives from an external producer.
///
/// An `Event` is an immutable dictionary of named fields plus the
/// pre-extracted [`EventId`] taken from its `_unique_id` field. Once
/// constructed, an `Event` never changes: streams accumulate references to
/// events, they never mutate them.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: EventId,
    fields: Value,
}

impl Event {
    /// Builds an `Event` from a JSON object, extracting its `_unique_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::BadEvent`] when `fields` is not a JSON
    /// object, or when it has no non-empty string `_unique_id` field.
    pub fn from_value(fields: Value) -> Result<Self, crate::errors::BadEvent> {
        let unique_id = fields
            .as_object()
            .and_then(|obj| obj.get(UNIQUE_ID_FIELD))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(crate::errors::BadEvent::missing_unique_id)?;
        let id = EventId::new(unique_id);
        Ok(Self { id, fields })
    }

    /// The event's unique identifier.
    #[must_use]
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// The value of a named field, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_object().and_then(|obj| obj.get(name))
    }

    /// The event's `event_type` field, if present and a string.
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.field("event_type").and_then(Value::as_str)
    }

    /// The full JSON payload backing this event.
    #[must_use]
    pub fn fields(&self) -> &Value {
        &self.fields
    }

    /// The ordering key used to sort a stream's events: nanoseconds since
    /// the Unix epoch, taken from the first present field in
    /// [`TIMESTAMP_FIELDS`]. A numeric field is read as whole epoch
    /// seconds; a string field is parsed as RFC 3339 (a profile of
    /// ISO-8601). Events carrying no recognized or parseable timestamp
    /// field sort before all others, stably, by insertion order among
    /// themselves.
    #[must_use]
    pub fn timestamp_key(&self) -> Option<i128> {
        TIMESTAMP_FIELDS.iter().find_map(|name| {
            let value = self.field(name)?;
            if let Some(seconds) = value.as_i64() {
                return Some(i128::from(seconds) * 1_000_000_000);
            }
            if let Some(text) = value.as_str() {
                return Timestamp::parse_rfc3339(text)
                    .ok()
                    .map(|ts| ts.as_offset_date_time().unix_timestamp_nanos());
            }
            None
        })
    }
}
