//! Resource metric samples and threshold violations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One point-in-time reading of runner resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    /// System memory utilization, 0.0..=1.0
    pub memory_utilization: f64,
    /// Global CPU usage percent, 0.0..=100.0
    pub cpu_percent: f32,
    /// One-minute load average
    pub load_average: f64,
    /// Logical CPU count observed at sample time
    pub cpu_count: usize,
    /// Resident memory of this process, in MB
    pub process_memory_mb: u64,
}

/// Kind of threshold that was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Memory,
    ProcessMemory,
    LoadAverage,
}

/// How bad the crossing was. Critical violations may end the host
/// process when auto-termination is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Warning,
    Critical,
}

/// A recorded threshold crossing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: ViolationSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Violation {
    pub fn new(kind: ViolationKind, severity: ViolationSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
