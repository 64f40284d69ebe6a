//! N+1 detection for deferred and explicit relation loads.
//!
//! Loading one relation per record inside a loop costs one round trip per
//! record. The tracker counts single-record loads per (schema, relation)
//! and warns once the count reaches a threshold; an `include` path would
//! have fetched the same data in the base query's round trip.

use std::collections::HashMap;

/// Tracks single-record relation loads.
#[derive(Debug)]
pub struct LoadTracker {
    /// (schema, relation) -> load count
    counts: HashMap<(String, String), usize>,
    /// Threshold for warning (loads per relation)
    threshold: usize,
    enabled: bool,
}

impl Default for LoadTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about relation loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Total number of single-record loads
    pub total_loads: usize,
    /// Number of distinct relations loaded
    pub relations_loaded: usize,
    /// Number of relations that reached the threshold
    pub potential_n1: usize,
}

impl LoadTracker {
    /// Create a new tracker with default threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a single-record relation load.
    ///
    /// When the count for a (schema, relation) pair reaches the threshold,
    /// a warning is emitted.
    pub fn record_load(&mut self, schema: &str, relation: &str) {
        if !self.enabled {
            return;
        }

        let count = self
            .counts
            .entry((schema.to_string(), relation.to_string()))
            .or_insert(0);
        *count += 1;
        if *count == self.threshold {
            tracing::warn!(
                target: "ormlet::n1",
                schema = schema,
                relation = relation,
                loads = *count,
                threshold = self.threshold,
                "N+1 load pattern detected; include the relation in the query instead"
            );
        }
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }

    #[must_use]
    pub fn count_for(&self, schema: &str, relation: &str) -> usize {
        self.counts
            .get(&(schema.to_string(), relation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self) -> LoadStats {
        LoadStats {
            total_loads: self.counts.values().sum(),
            relations_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|&&count| count >= self.threshold)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_relation() {
        let mut tracker = LoadTracker::new();
        tracker.record_load("products", "category");
        tracker.record_load("products", "category");
        tracker.record_load("products", "supplier");
        assert_eq!(tracker.count_for("products", "category"), 2);
        assert_eq!(tracker.count_for("products", "supplier"), 1);
        assert_eq!(tracker.count_for("orders", "customer"), 0);
        assert_eq!(tracker.stats().total_loads, 3);
    }

    #[test]
    fn stats_flag_relations_at_threshold() {
        let mut tracker = LoadTracker::new().with_threshold(2);
        for _ in 0..2 {
            tracker.record_load("orders", "customer");
        }
        tracker.record_load("orders", "shipper");
        let stats = tracker.stats();
        assert_eq!(stats.total_loads, 3);
        assert_eq!(stats.relations_loaded, 2);
        assert_eq!(stats.potential_n1, 1);
    }

    #[test]
    fn disabled_tracker_records_nothing() {
        let mut tracker = LoadTracker::new().enabled(false);
        tracker.record_load("orders", "customer");
        assert_eq!(tracker.stats(), LoadStats::default());
        tracker = tracker.enabled(true);
        tracker.record_load("orders", "customer");
        assert_eq!(tracker.count_for("orders", "customer"), 1);
        tracker.reset();
        assert_eq!(tracker.stats(), LoadStats::default());
    }
}
