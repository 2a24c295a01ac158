//! Post-mortem failure analysis.
//!
//! When the pipeline aborts, the analyzer collects phase records,
//! captured session output, and a snapshot of the relevant environment
//! into a JSON artifact, then classifies the most likely root cause.
//! Analysis is best-effort: callers log its errors and never let them
//! replace the original pipeline error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::models::{PhaseRecord, PipelineState, SessionRecord};

/// Classified root cause of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootCause {
    PortConflict,
    SimulatorStartup,
    SessionTimeout,
    Network,
    ResourceExhaustion,
    TestFailure,
    QualityGate,
    Unknown,
}

impl RootCause {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PortConflict => "port-conflict",
            Self::SimulatorStartup => "simulator-startup",
            Self::SessionTimeout => "session-timeout",
            Self::Network => "network",
            Self::ResourceExhaustion => "resource-exhaustion",
            Self::TestFailure => "test-failure",
            Self::QualityGate => "quality-gate",
            Self::Unknown => "unknown",
        }
    }
}

/// Captured output from one session, truncated for the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionCapture {
    pub session: String,
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// The persisted analysis artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FailureReport {
    pub analyzed_at: DateTime<Utc>,
    pub root_cause: RootCause,
    pub error: String,
    pub phases: Vec<PhaseRecord>,
    pub warnings: Vec<String>,
    pub captures: Vec<SessionCapture>,
    pub environment: BTreeMap<String, String>,
}

const CAPTURE_TAIL_BYTES: usize = 4096;
const ENV_KEYS: &[&str] = &["CI", "NODE_ENV", "GITHUB_REF", "GITHUB_SHA", "RUNNER_OS"];

pub struct FailureAnalyzer {
    reports_dir: PathBuf,
}

impl FailureAnalyzer {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    /// Classify a pipeline error into a root cause bucket. Structured
    /// errors classify directly; anything else falls back to text
    /// heuristics shared with the flaky taxonomy.
    pub fn classify(&self, error: &PipelineError) -> RootCause {
        match error {
            PipelineError::PortUnavailable(_) | PipelineError::PortExhausted { .. } => {
                RootCause::PortConflict
            }
            PipelineError::StartupTimeout { .. } | PipelineError::SimulatorUnhealthy(_) => {
                RootCause::SimulatorStartup
            }
            PipelineError::QualityGateFailed { .. } => RootCause::QualityGate,
            PipelineError::TestsFailed { .. } => RootCause::TestFailure,
            other => classify_text(&other.to_string()),
        }
    }

    /// Build and persist the analysis artifact; returns its path.
    pub async fn analyze(
        &self,
        error: &PipelineError,
        state: &PipelineState,
        sessions: &[SessionRecord],
    ) -> PipelineResult<PathBuf> {
        let report = FailureReport {
            analyzed_at: Utc::now(),
            root_cause: self.classify(error),
            error: error.to_string(),
            phases: state.phases.clone(),
            warnings: state.warnings.clone(),
            captures: sessions.iter().map(capture_session).collect(),
            environment: environment_snapshot(),
        };

        tokio::fs::create_dir_all(&self.reports_dir).await?;
        let path = self.reports_dir.join("failure-analysis.json");
        let body = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&path, body).await?;

        info!(
            root_cause = report.root_cause.as_str(),
            path = %path.display(),
            "Failure analysis written"
        );
        Ok(path)
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }
}

fn classify_text(text: &str) -> RootCause {
    let lower = text.to_lowercase();
    if lower.contains("eaddrinuse") || lower.contains("port") {
        RootCause::PortConflict
    } else if lower.contains("timeout") || lower.contains("timed out") {
        RootCause::SessionTimeout
    } else if lower.contains("econnrefused")
        || lower.contains("econnreset")
        || lower.contains("socket hang up")
    {
        RootCause::Network
    } else if lower.contains("out of memory") || lower.contains("enomem") {
        RootCause::ResourceExhaustion
    } else if lower.contains("simulator") {
        RootCause::SimulatorStartup
    } else if lower.contains("test") && lower.contains("fail") {
        RootCause::TestFailure
    } else {
        RootCause::Unknown
    }
}

fn capture_session(record: &SessionRecord) -> SessionCapture {
    SessionCapture {
        session: record.spec.name.clone(),
        exit_code: record.exit_code,
        stdout_tail: tail(&record.stdout),
        stderr_tail: tail(&record.stderr),
    }
}

fn tail(text: &str) -> String {
    if text.len() <= CAPTURE_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - CAPTURE_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

fn environment_snapshot() -> BTreeMap<String, String> {
    let mut snapshot = BTreeMap::new();
    for (key, value) in std::env::vars() {
        if key.starts_with("HELMSMAN_") || ENV_KEYS.contains(&key.as_str()) {
            snapshot.insert(key, value);
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PortTriple, SessionOutcome, SessionSpec};
    use uuid::Uuid;

    fn analyzer(dir: &Path) -> FailureAnalyzer {
        FailureAnalyzer::new(dir)
    }

    #[test]
    fn test_structured_errors_classify_directly() {
        let a = FailureAnalyzer::new("reports");
        assert_eq!(
            a.classify(&PipelineError::PortUnavailable(10110)),
            RootCause::PortConflict
        );
        assert_eq!(
            a.classify(&PipelineError::StartupTimeout { elapsed_secs: 30 }),
            RootCause::SimulatorStartup
        );
        assert_eq!(
            a.classify(&PipelineError::TestsFailed { failed: 2, total: 9 }),
            RootCause::TestFailure
        );
        assert_eq!(
            a.classify(&PipelineError::QualityGateFailed {
                score: 55.0,
                violations: 3
            }),
            RootCause::QualityGate
        );
    }

    #[test]
    fn test_text_fallback_classification() {
        assert_eq!(classify_text("listen EADDRINUSE :::3100"), RootCause::PortConflict);
        assert_eq!(classify_text("request timed out"), RootCause::SessionTimeout);
        assert_eq!(classify_text("connect ECONNREFUSED"), RootCause::Network);
        assert_eq!(
            classify_text("JavaScript heap out of memory"),
            RootCause::ResourceExhaustion
        );
        assert_eq!(classify_text("something odd"), RootCause::Unknown);
    }

    #[test]
    fn test_tail_truncates_long_output() {
        let long = "x".repeat(CAPTURE_TAIL_BYTES * 2);
        assert_eq!(tail(&long).len(), CAPTURE_TAIL_BYTES);
        assert_eq!(tail("short"), "short");
    }

    #[tokio::test]
    async fn test_analyze_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let a = analyzer(dir.path());

        let mut state = PipelineState::default();
        state.warnings.push("coverage summary missing".to_string());

        let record = SessionRecord {
            id: Uuid::new_v4(),
            spec: SessionSpec::new("widgets", vec!["a.test.ts".to_string()], "calm-harbor"),
            ports: PortTriple {
                data_stream: 10110,
                api: 3100,
                transport: 8180,
            },
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            exit_code: Some(1),
            outcome: SessionOutcome::Failed,
            stdout: "1 failed".to_string(),
            stderr: String::new(),
        };

        let error = PipelineError::TestsFailed { failed: 1, total: 4 };
        let path = a.analyze(&error, &state, &[record]).await.unwrap();

        let raw = std::fs::read_to_string(path).unwrap();
        let report: FailureReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(report.root_cause, RootCause::TestFailure);
        assert_eq!(report.captures.len(), 1);
        assert_eq!(report.warnings.len(), 1);
    }
}
