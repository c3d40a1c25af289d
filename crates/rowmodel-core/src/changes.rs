//! Dirty-field tracking for rows.
//!
//! A row records the name of every field explicitly assigned since it was
//! built, saved or reloaded. Persistence reads the log to build minimal
//! update payloads; it never compares old and new values, so re-assigning
//! an identical value still counts as a change.

use std::collections::HashSet;

/// The set of field names assigned since the last save or reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    /// Dirty names in first-assignment order
    order: Vec<String>,
    seen: HashSet<String>,
}

impl ChangeLog {
    /// Create an empty change log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a field as dirty.
    pub fn mark(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.order.push(name.to_string());
        }
    }

    /// Whether a field has been assigned since the last reset.
    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    /// Dirty field names in first-assignment order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget every change, e.g. after a successful save.
    pub fn clear(&mut self) {
        tracing::trace!(cleared = self.order.len(), "Clearing change log");
        self.order.clear();
        self.seen.clear();
    }
}
