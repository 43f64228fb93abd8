//! Driver selection tracking
//!
//! Every driver chosen by a validated declaration is marked used. Once the
//! whole configuration tree has been validated, [`SelectionTracker::finalize`]
//! computes which catalog entries must be left out of the build.

use std::collections::BTreeSet;
use tracing::debug;

/// Catalog names reserved for fallback behaviour
pub const DEFAULT_SENTINELS: [&str; 2] = ["auto", "unknown"];

/// The sentinel kept in the build when nothing was selected
pub const FALLBACK_SENTINEL: &str = "unknown";

/// Accumulates the catalog entries actually referenced by declarations
#[derive(Debug, Clone, Default)]
pub struct SelectionTracker {
    all: BTreeSet<String>,
    sentinels: BTreeSet<String>,
    used: BTreeSet<String>,
}

impl SelectionTracker {
    /// Create a tracker over every catalog name and the reserved sentinels
    pub fn new<A, S>(all: A, sentinels: S) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            all: all.into_iter().map(Into::into).collect(),
            sentinels: sentinels.into_iter().map(Into::into).collect(),
            used: BTreeSet::new(),
        }
    }

    /// Record `name` as selected. Returns whether it was newly added.
    pub fn mark_used(&mut self, name: &str) -> bool {
        let added = self.used.insert(name.to_string());
        if added {
            debug!(driver = name, "Driver selected");
        }
        added
    }

    pub fn used(&self) -> &BTreeSet<String> {
        &self.used
    }

    pub fn is_sentinel(&self, name: &str) -> bool {
        self.sentinels.contains(name)
    }

    /// Names to exclude from the build
    ///
    /// Only meaningful after every declaration has been validated; an
    /// earlier call sees a partial selection.
    ///
    /// Every unused catalog entry is excluded. Unused sentinels are excluded
    /// too, except the fallback when nothing at all was selected.
    pub fn finalize(&self) -> BTreeSet<String> {
        let mut excluded: BTreeSet<String> = self.all.difference(&self.used).cloned().collect();

        if self.used.is_empty() {
            excluded.extend(
                self.sentinels
                    .iter()
                    .filter(|name| name.as_str() != FALLBACK_SENTINEL)
                    .cloned(),
            );
            excluded.remove(FALLBACK_SENTINEL);
        } else {
            excluded.extend(self.sentinels.difference(&self.used).cloned());
        }
        excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SelectionTracker {
        SelectionTracker::new(["a", "b", "unknown", "auto"], DEFAULT_SENTINELS)
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_nothing_used_keeps_only_fallback() {
        assert_eq!(tracker().finalize(), set(&["a", "b", "auto"]));
    }

    #[test]
    fn test_single_driver_used() {
        let mut tracker = tracker();
        assert!(tracker.mark_used("a"));
        assert_eq!(tracker.finalize(), set(&["b", "auto", "unknown"]));
    }

    #[test]
    fn test_mark_used_is_idempotent() {
        let mut tracker = tracker();
        assert!(tracker.mark_used("b"));
        assert!(!tracker.mark_used("b"));
        assert_eq!(tracker.used(), &set(&["b"]));
    }

    #[test]
    fn test_explicitly_used_sentinel_stays() {
        let mut tracker = tracker();
        tracker.mark_used("a");
        tracker.mark_used("unknown");
        assert_eq!(tracker.finalize(), set(&["b", "auto"]));
    }

    #[test]
    fn test_empty_catalog() {
        let tracker = SelectionTracker::new(Vec::<String>::new(), DEFAULT_SENTINELS);
        assert_eq!(tracker.finalize(), set(&["auto"]));
    }
}
