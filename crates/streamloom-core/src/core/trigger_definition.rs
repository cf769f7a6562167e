//! The configured rule binding identifying fields, a firing criterion, and
//! one or more pipeline callbacks.

use serde_json::Map as JsonMap;

use super::criterion::Criterion;
use super::event::Event;
use super::identifiers::TriggerName;
use super::stream::IdentifyingTraitDict;
use crate::runtime::callback_host::PipelineCallback;

/// Splits a `/`-separated field path into its segments.
fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Resolves a `/`-separated path against an event's JSON fields.
fn resolve_path<'a>(fields: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path_segments(path).try_fold(fields, |value, segment| value.get(segment))
}

/// Immutable configuration binding identifying fields, a criterion, and an
/// ordered callback list.
///
/// A `TriggerDefinition` never mutates after construction; it is shared
/// read-only across every worker that ingests events or scans streams.
pub struct TriggerDefinition {
    name: TriggerName,
    identifying_trait_paths: Vec<String>,
    criterion: Box<dyn Criterion>,
    pipeline_callbacks: Vec<Box<dyn PipelineCallback>>,
    debug: bool,
}

impl TriggerDefinition {
    /// Builds a trigger definition. `identifying_trait_paths` use `/` as
    /// the nesting separator (for example `payload/instance_id`).
    #[must_use]
    pub fn new(
        name: impl Into<TriggerName>,
        identifying_trait_paths: Vec<String>,
        criterion: Box<dyn Criterion>,
        pipeline_callbacks: Vec<Box<dyn PipelineCallback>>,
    ) -> Self {
        Self {
            name: name.into(),
            identifying_trait_paths,
            criterion,
            pipeline_callbacks,
            debug: false,
        }
    }

    /// Enables per-event debug counters for this trigger.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// This trigger's unique name.
    #[must_use]
    pub fn name(&self) -> &TriggerName {
        &self.name
    }

    /// Whether this trigger was configured with debug counters enabled.
    #[must_use]
    pub const fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// The configured firing criterion.
    #[must_use]
    pub fn criterion(&self) -> &dyn Criterion {
        self.criterion.as_ref()
    }

    /// The ordered pipeline callbacks invoked on a claimed stream.
    #[must_use]
    pub fn pipeline_callbacks(&self) -> &[Box<dyn PipelineCallback>] {
        &self.pipeline_callbacks
    }

    /// True iff every identifying path resolves in `event`. Never inspects
    /// the resolved values, only their presence.
    #[must_use]
    pub fn applies(&self, event: &Event) -> bool {
        self.identifying_trait_paths
            .iter()
            .all(|path| resolve_path(event.fields(), path).is_some())
    }

    /// Extracts the identifying values declared for this trigger, skipping
    /// any path missing from `event`. Callers MUST check [`Self::applies`]
    /// first; this method does not itself guarantee completeness.
    #[must_use]
    pub fn get_identifying_trait_dict(&self, event: &Event) -> IdentifyingTraitDict {
        let mut dict = JsonMap::new();
        for path in &self.identifying_trait_paths {
            if let Some(value) = resolve_path(event.fields(), path) {
                dict.insert(path.clone(), value.clone());
            }
        }
        dict
    }
}
