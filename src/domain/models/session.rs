//! Test session domain models.
//!
//! A session is one isolated pairing of a data-simulator process and a
//! test-runner process with dedicated, non-conflicting ports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three ports a session owns, one per simulator service.
///
/// Invariant: triples are disjoint across all concurrently live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PortTriple {
    /// NMEA data stream port
    pub data_stream: u16,
    /// Simulator HTTP API port
    pub api: u16,
    /// Transport/websocket port
    pub transport: u16,
}

impl PortTriple {
    /// All three ports as a slice-friendly array.
    pub const fn as_array(self) -> [u16; 3] {
        [self.data_stream, self.api, self.transport]
    }

    /// True when no port is shared with `other`.
    pub fn is_disjoint(self, other: Self) -> bool {
        let mine = self.as_array();
        !other.as_array().iter().any(|p| mine.contains(p))
    }
}

/// What a session should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionSpec {
    /// Human-readable session name (usually the suite or test file)
    pub name: String,
    /// Test files handed to the runner; empty means the runner's default set
    pub test_files: Vec<String>,
    /// Simulator scenario for this session
    pub scenario: String,
}

impl SessionSpec {
    pub fn new(name: impl Into<String>, test_files: Vec<String>, scenario: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            test_files,
            scenario: scenario.into(),
        }
    }
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Passed,
    Failed,
    TimedOut,
}

impl SessionOutcome {
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Durable record of a finished session, retained for reporting after
/// its processes are gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    pub id: Uuid,
    pub spec: SessionSpec,
    pub ports: PortTriple,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub outcome: SessionOutcome,
    /// Combined captured stdout of the test runner
    pub stdout: String,
    /// Combined captured stderr of the test runner
    pub stderr: String,
}

impl SessionRecord {
    /// Duration in milliseconds, when the session has ended.
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
