//! Persisted test-file to source-file adjacency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bidirectional test↔source adjacency built from static import
/// analysis plus directory-proximity heuristics.
///
/// `BTreeMap`/`BTreeSet` keep rebuilds byte-identical for an unchanged
/// corpus, which is what makes generation idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DependencyMapping {
    pub test_to_sources: BTreeMap<String, BTreeSet<String>>,
    pub source_to_tests: BTreeMap<String, BTreeSet<String>>,
    pub generated_at: DateTime<Utc>,
}

impl DependencyMapping {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            test_to_sources: BTreeMap::new(),
            source_to_tests: BTreeMap::new(),
            generated_at: now,
        }
    }

    /// Insert one edge in both directions.
    pub fn add_edge(&mut self, test: &str, source: &str) {
        self.test_to_sources
            .entry(test.to_string())
            .or_default()
            .insert(source.to_string());
        self.source_to_tests
            .entry(source.to_string())
            .or_default()
            .insert(test.to_string());
    }

    /// Tests mapped from a changed source file.
    pub fn tests_for_source(&self, source: &str) -> BTreeSet<String> {
        self.source_to_tests
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of directed test→source edges.
    pub fn edge_count(&self) -> usize {
        self.test_to_sources.values().map(BTreeSet::len).sum()
    }

    /// Whether the map is older than `max_age_hours` at `now`.
    pub fn is_stale(&self, max_age_hours: i64, now: DateTime<Utc>) -> bool {
        now - self.generated_at > chrono::Duration::hours(max_age_hours)
    }
}
