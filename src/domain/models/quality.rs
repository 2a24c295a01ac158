//! Quality gate domain models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The four coverage sub-metrics for one category, as percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoverageMetrics {
    pub statements: f64,
    pub branches: f64,
    pub functions: f64,
    pub lines: f64,
}

impl CoverageMetrics {
    pub const fn uniform(pct: f64) -> Self {
        Self {
            statements: pct,
            branches: pct,
            functions: pct,
            lines: pct,
        }
    }

    /// Category score: mean of the four sub-metric percentages.
    pub fn score(&self) -> f64 {
        (self.statements + self.branches + self.functions + self.lines) / 4.0
    }

    /// Sub-metrics below `threshold`, by name.
    pub fn below(&self, threshold: f64) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.statements < threshold {
            out.push("statements");
        }
        if self.branches < threshold {
            out.push("branches");
        }
        if self.functions < threshold {
            out.push("functions");
        }
        if self.lines < threshold {
            out.push("lines");
        }
        out
    }
}

/// Coverage by category (global, widgets, services, integration).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoverageReport {
    pub categories: BTreeMap<String, CoverageMetrics>,
}

/// One sub-metric below its category threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QualityViolation {
    pub category: String,
    pub metric: String,
    pub actual: f64,
    pub threshold: f64,
}

/// Aggregated gate result, computed fresh each run and persisted only
/// inside the run's report artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QualityResult {
    /// Mean category coverage score, when coverage was present
    pub coverage_score: Option<f64>,
    /// Performance suite verdict, when present
    pub performance_passed: Option<bool>,
    /// Marine-safety suite verdict, when present
    pub marine_safety_passed: Option<bool>,
    /// Weighted overall score normalized over present signals
    pub quality_score: f64,
    pub violations: Vec<QualityViolation>,
    pub passed: bool,
}
