//! Pipeline-wide state, owned exclusively by the orchestrator.
//!
//! Other components return results; only the orchestrator mutates
//! `PipelineState`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The deterministic pipeline phases. Bracketed ones in the run order
/// are feature-flag gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseKind {
    Setup,
    ResourceOptimization,
    SimulatorSetup,
    TestExecution,
    QualityGates,
    Reporting,
    Cleanup,
}

impl PhaseKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::ResourceOptimization => "resource-optimization",
            Self::SimulatorSetup => "simulator-setup",
            Self::TestExecution => "test-execution",
            Self::QualityGates => "quality-gates",
            Self::Reporting => "reporting",
            Self::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Record of one phase run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PhaseRecord {
    pub kind: PhaseKind,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Mutable pipeline state. Single owner: the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineState {
    pub current_phase: Option<PhaseKind>,
    pub phases: Vec<PhaseRecord>,
    /// Per-phase structured results, keyed by phase name
    pub results: BTreeMap<String, serde_json::Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a phase as started.
    pub fn begin_phase(&mut self, kind: PhaseKind) {
        self.current_phase = Some(kind);
        self.phases.push(PhaseRecord {
            kind,
            status: PhaseStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        });
    }

    /// Mark the most recent record for `kind` as finished.
    pub fn end_phase(&mut self, kind: PhaseKind, status: PhaseStatus, error: Option<String>) {
        if let Some(record) = self.phases.iter_mut().rev().find(|p| p.kind == kind) {
            record.status = status;
            record.ended_at = Some(Utc::now());
            record.error = error;
        }
        if self.current_phase == Some(kind) {
            self.current_phase = None;
        }
    }

    /// Store a phase result payload.
    pub fn record_result(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.results.insert(key.into(), value);
    }

    pub fn any_phase_failed(&self) -> bool {
        self.phases.iter().any(|p| p.status == PhaseStatus::Failed)
    }
}

/// Structured return value of a full pipeline run. Secondary failures
/// during analysis or cleanup never replace the original error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineOutcome {
    pub success: bool,
    pub duration_ms: u64,
    pub results: BTreeMap<String, serde_json::Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_lifecycle() {
        let mut state = PipelineState::new();
        state.begin_phase(PhaseKind::Setup);
        assert_eq!(state.current_phase, Some(PhaseKind::Setup));

        state.end_phase(PhaseKind::Setup, PhaseStatus::Completed, None);
        assert_eq!(state.current_phase, None);
        assert_eq!(state.phases.len(), 1);
        assert_eq!(state.phases[0].status, PhaseStatus::Completed);
        assert!(!state.any_phase_failed());
    }

    #[test]
    fn test_failed_phase_detected() {
        let mut state = PipelineState::new();
        state.begin_phase(PhaseKind::TestExecution);
        state.end_phase(
            PhaseKind::TestExecution,
            PhaseStatus::Failed,
            Some("3 of 12 tests failed".to_string()),
        );
        assert!(state.any_phase_failed());
        assert_eq!(
            state.phases[0].error.as_deref(),
            Some("3 of 12 tests failed")
        );
    }
}
