//! Domain errors for the Helmsman pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Pipeline-level errors.
///
/// Three classes: fatal infrastructure errors (ports, simulator startup,
/// process spawn) abort the run; test-level failures are routed through
/// flaky classification first; advisory failures (reporting, resource
/// optimization setup) surface as warnings at the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Port {0} is unavailable")]
    PortUnavailable(u16),

    #[error("Port range exhausted for {service}: scanned {attempts} ports from {start}")]
    PortExhausted {
        service: String,
        start: u16,
        attempts: u32,
    },

    #[error("Session limit reached: {active} active, max {max} (no queueing)")]
    SessionLimitReached { active: usize, max: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Simulator startup timed out after {elapsed_secs}s")]
    StartupTimeout { elapsed_secs: u64 },

    #[error("Simulator unhealthy: {0}")]
    SimulatorUnhealthy(String),

    #[error("Invalid simulator state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    #[error("Process '{name}' failed with exit code {code:?}")]
    ProcessFailed { name: String, code: Option<i32> },

    #[error("Version control error: {0}")]
    Vcs(String),

    #[error("Quality gate failed: score {score:.1}, {violations} violation(s)")]
    QualityGateFailed { score: f64, violations: usize },

    #[error("Test execution failed: {failed} of {total} tests failed")]
    TestsFailed { failed: usize, total: usize },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("State store error: {0}")]
    StateStore(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::SimulatorUnhealthy(err.to_string())
    }
}
