//! # Event Filters
//!
//! Predicate-style filters used by filtered subscriptions and routes.
//!
//! A filter matches an event iff every specified clause matches (logical
//! AND). An absent clause is vacuously true, so `EventFilter::all()` matches
//! everything.
//!
//! Type clauses are case-insensitive glob patterns: `*` matches any run of
//! characters, `?` exactly one.
//!
//! A custom predicate that panics is treated as a non-match, so a faulty
//! filter never unwinds into an emitter or the drain engine.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;
use trading_types::{Event, EventPriority};

/// Custom predicate evaluated after the declarative clauses.
pub type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Filter for subscribing to a subset of events.
#[derive(Clone, Default)]
pub struct EventFilter {
    /// Type patterns; the event type must match at least one.
    pub types: Option<Vec<String>>,
    /// Allowed sources; events without a source never match a source clause.
    pub sources: Option<Vec<String>>,
    /// Inclusive lower priority bound.
    pub min_priority: Option<EventPriority>,
    /// Inclusive upper priority bound.
    pub max_priority: Option<EventPriority>,
    /// Arbitrary extra predicate.
    pub custom: Option<EventPredicate>,
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("types", &self.types)
            .field("sources", &self.sources)
            .field("min_priority", &self.min_priority)
            .field("max_priority", &self.max_priority)
            .field("custom", &self.custom.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for a single type pattern.
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::types(vec![pattern.into()])
    }

    /// Create a filter for any of the given type patterns.
    #[must_use]
    pub fn types<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: Some(patterns.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Restrict to events from the given sources.
    #[must_use]
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to events at or above `priority`.
    #[must_use]
    pub fn with_min_priority(mut self, priority: EventPriority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Restrict to events at or below `priority`.
    #[must_use]
    pub fn with_max_priority(mut self, priority: EventPriority) -> Self {
        self.max_priority = Some(priority);
        self
    }

    /// Add a custom predicate.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(predicate));
        self
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let type_match = self.types.as_ref().map_or(true, |patterns| {
            patterns
                .iter()
                .any(|pattern| glob_match(pattern, &event.event_type))
        });
        if !type_match {
            return false;
        }

        let source_match = self.sources.as_ref().map_or(true, |sources| {
            event
                .source
                .as_ref()
                .is_some_and(|source| sources.contains(source))
        });
        if !source_match {
            return false;
        }

        if self.min_priority.is_some_and(|min| event.priority < min) {
            return false;
        }
        if self.max_priority.is_some_and(|max| event.priority > max) {
            return false;
        }

        self.custom.as_ref().map_or(true, |predicate| {
            panic::catch_unwind(AssertUnwindSafe(|| predicate(event))).unwrap_or_else(|_| {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Filter predicate panicked; treating as no match"
                );
                false
            })
        })
    }
}

/// Case-insensitive glob match of `text` against `pattern`.
///
/// Two-pointer walk that remembers only the most recent `*`, so the cost is
/// bounded by `pattern.len() * text.len()` with no recursive backtracking.
/// Empty text never matches.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if text.is_empty() {
        return false;
    }

    let pattern: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = t;
            p += 1;
        } else if let Some(star_at) = star {
            // Let the last star swallow one more character.
            p = star_at + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
