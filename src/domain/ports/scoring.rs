//! Flaky scoring port.
//!
//! The confidence formula is an unvalidated heuristic, so it lives
//! behind a trait where it can be recalibrated or replaced wholesale.

use serde::{Deserialize, Serialize};

use crate::domain::models::TestHistoryEntry;

/// Verdict for one observed failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FlakyVerdict {
    pub is_flaky: bool,
    /// 0.0..=1.0; retries require this above the configured floor
    pub confidence: f64,
    /// Name of the failure pattern that matched, if any
    pub matched_pattern: Option<String>,
    pub reason: String,
}

impl FlakyVerdict {
    pub fn not_flaky(reason: impl Into<String>) -> Self {
        Self {
            is_flaky: false,
            confidence: 0.0,
            matched_pattern: None,
            reason: reason.into(),
        }
    }
}

/// Decides whether a failure looks flaky and how confident we are.
pub trait FlakyScorer: Send + Sync {
    /// Score a failure from its combined error+output text and the
    /// test's execution history, when one exists.
    fn score(
        &self,
        test_id: &str,
        failure_text: &str,
        history: Option<&TestHistoryEntry>,
    ) -> FlakyVerdict;
}
