//! Handler filters: predicates that must all accept an envelope before a
//! handler runs.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tracing::warn;

use crate::event::{Event, EventKind, Payload};

/// Predicate over an envelope.
pub trait Filter: Send + Sync {
    fn matches(&self, event: &Event) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn matches(&self, event: &Event) -> bool {
        self(event)
    }
}

/// Declarative filter over kind, source and payload values.
///
/// Every populated criterion must hold. Payload patterns compare by equality;
/// a missing key rejects.
///
/// ```
/// use weft_core::{Event, EventFilter, Filter};
///
/// let filter = EventFilter::new().with_pattern("a", 1).with_pattern("b", 2);
/// let hit = Event::new("Order", "test").with_field("a", 1).with_field("b", 2).with_field("c", 3);
/// let miss = Event::new("Order", "test").with_field("a", 1).with_field("b", 5);
/// assert!(filter.matches(&hit));
/// assert!(!filter.matches(&miss));
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Vec<EventKind>,
    pub sources: Vec<String>,
    pub data_patterns: Payload,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: impl Into<EventKind>) -> Self {
        self.kinds.push(kind.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn with_pattern(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data_patterns.insert(key.into(), value.into());
        self
    }

    /// Filter built from a full pattern map.
    pub fn from_patterns(patterns: Payload) -> Self {
        Self {
            data_patterns: patterns,
            ..Self::default()
        }
    }
}

impl Filter for EventFilter {
    fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(event.kind()) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.iter().any(|s| s == event.source()) {
            return false;
        }
        self.data_patterns
            .iter()
            .all(|(key, expected)| event.get(key) == Some(expected))
    }
}

/// Runs every filter in order; a panicking filter counts as a rejection.
pub(crate) fn accepts_all(filters: &[std::sync::Arc<dyn Filter>], event: &Event) -> bool {
    filters.iter().all(|f| {
        match catch_unwind(AssertUnwindSafe(|| f.matches(event))) {
            Ok(accepted) => accepted,
            Err(_) => {
                warn!(target: "event_bus", kind = %event.kind(), "Filter panicked; treating as rejection");
                false
            }
        }
    })
}
