//! Per-test execution history used by the flaky classifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rolling statistics for one test, updated after every attempt
/// regardless of whether the attempt was a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestHistoryEntry {
    pub successes: u64,
    pub failures: u64,
    pub total_executions: u64,
    pub average_execution_time_ms: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl TestHistoryEntry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            successes: 0,
            failures: 0,
            total_executions: 0,
            average_execution_time_ms: 0.0,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Record one attempt, folding its duration into the running mean.
    pub fn record(&mut self, passed: bool, duration_ms: u64, now: DateTime<Utc>) {
        if passed {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        let prev_total = self.total_executions as f64;
        self.average_execution_time_ms = (self.average_execution_time_ms * prev_total
            + duration_ms as f64)
            / (prev_total + 1.0);
        self.total_executions += 1;
        self.last_seen = now;
    }

    /// Success rate over all recorded executions; 1.0 for an empty history.
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            1.0
        } else {
            self.successes as f64 / self.total_executions as f64
        }
    }
}

/// Full persisted history, keyed by test identifier.
///
/// `BTreeMap` keeps serialization deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestHistory {
    pub entries: BTreeMap<String, TestHistoryEntry>,
}

impl TestHistory {
    /// Drop entries not seen for more than `retention_days`.
    /// Returns the number of pruned entries.
    pub fn prune(&mut self, retention_days: i64, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::days(retention_days);
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen >= cutoff);
        before - self.entries.len()
    }
}
