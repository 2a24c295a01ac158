//! Quality gate evaluation.
//!
//! Aggregates coverage, performance, and marine-safety signals into a
//! single weighted score. The gate passes only when no sub-metric
//! violates its category threshold and the score clears the bar; a
//! strong signal can never paper over an explicit violation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::errors::PipelineResult;
use crate::domain::models::{
    CoverageMetrics, CoverageReport, QualityConfig, QualityResult, QualityViolation,
};

const COVERAGE_WEIGHT: f64 = 0.4;
const PERFORMANCE_WEIGHT: f64 = 0.3;
const SAFETY_WEIGHT: f64 = 0.3;

/// One metric block in an istanbul coverage summary.
#[derive(Debug, Deserialize)]
struct SummaryMetric {
    pct: f64,
}

/// One entry (the `total` key or a file path) in the summary.
#[derive(Debug, Deserialize)]
struct SummaryEntry {
    statements: SummaryMetric,
    branches: SummaryMetric,
    functions: SummaryMetric,
    lines: SummaryMetric,
}

pub struct QualityGateEvaluator {
    config: QualityConfig,
}

impl QualityGateEvaluator {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Load the coverage summary relative to `project_root`. A missing
    /// file is not an error: coverage is then simply absent from the
    /// score.
    pub async fn load_coverage(&self, project_root: &Path) -> PipelineResult<Option<CoverageReport>> {
        let path = project_root.join(&self.config.coverage_summary);
        if !path.exists() {
            warn!(path = %path.display(), "Coverage summary not found, skipping coverage signal");
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        let report = parse_coverage_summary(&raw)?;
        Ok(Some(report))
    }

    fn threshold_for(&self, category: &str) -> f64 {
        match category {
            "widgets" => self.config.thresholds.widgets,
            "services" => self.config.thresholds.services,
            "integration" => self.config.thresholds.integration,
            _ => self.config.thresholds.global,
        }
    }

    /// Compute the gate verdict from whichever signals are present.
    ///
    /// Score is a weighted mean normalized over present signals:
    /// coverage 0.4, performance 0.3, safety 0.3, with the boolean
    /// signals contributing 100 or 0.
    pub fn evaluate(
        &self,
        coverage: Option<&CoverageReport>,
        performance_passed: Option<bool>,
        marine_safety_passed: Option<bool>,
    ) -> QualityResult {
        let mut violations = Vec::new();
        let coverage_score = coverage.map(|report| {
            let mut sum = 0.0;
            let mut count = 0usize;
            for (category, metrics) in &report.categories {
                let threshold = self.threshold_for(category);
                for metric in metrics.below(threshold) {
                    let actual = match metric {
                        "statements" => metrics.statements,
                        "branches" => metrics.branches,
                        "functions" => metrics.functions,
                        _ => metrics.lines,
                    };
                    violations.push(QualityViolation {
                        category: category.clone(),
                        metric: metric.to_string(),
                        actual,
                        threshold,
                    });
                }
                sum += metrics.score();
                count += 1;
            }
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        });

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        if let Some(score) = coverage_score {
            weighted += COVERAGE_WEIGHT * score;
            total_weight += COVERAGE_WEIGHT;
        }
        if let Some(passed) = performance_passed {
            weighted += PERFORMANCE_WEIGHT * if passed { 100.0 } else { 0.0 };
            total_weight += PERFORMANCE_WEIGHT;
        }
        if let Some(passed) = marine_safety_passed {
            weighted += SAFETY_WEIGHT * if passed { 100.0 } else { 0.0 };
            total_weight += SAFETY_WEIGHT;
        }

        let quality_score = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };

        let passed = violations.is_empty() && quality_score >= self.config.pass_score;
        info!(
            score = format!("{quality_score:.1}"),
            violations = violations.len(),
            passed,
            "Quality gate evaluated"
        );

        QualityResult {
            coverage_score,
            performance_passed,
            marine_safety_passed,
            quality_score,
            violations,
            passed,
        }
    }
}

/// Parse an istanbul `coverage-summary.json` into per-category
/// metrics. The `total` entry becomes the `global` category; file
/// entries are bucketed by path segment and averaged.
pub fn parse_coverage_summary(raw: &str) -> PipelineResult<CoverageReport> {
    let entries: BTreeMap<String, SummaryEntry> = serde_json::from_str(raw)?;

    let mut sums: BTreeMap<&'static str, (CoverageMetrics, usize)> = BTreeMap::new();
    let mut categories = BTreeMap::new();

    for (key, entry) in &entries {
        let metrics = CoverageMetrics {
            statements: entry.statements.pct,
            branches: entry.branches.pct,
            functions: entry.functions.pct,
            lines: entry.lines.pct,
        };
        if key == "total" {
            categories.insert("global".to_string(), metrics);
            continue;
        }
        let Some(category) = categorize_path(key) else {
            continue;
        };
        let slot = sums
            .entry(category)
            .or_insert((CoverageMetrics::uniform(0.0), 0));
        slot.0.statements += metrics.statements;
        slot.0.branches += metrics.branches;
        slot.0.functions += metrics.functions;
        slot.0.lines += metrics.lines;
        slot.1 += 1;
    }

    for (category, (sum, count)) in sums {
        let n = count as f64;
        categories.insert(
            category.to_string(),
            CoverageMetrics {
                statements: sum.statements / n,
                branches: sum.branches / n,
                functions: sum.functions / n,
                lines: sum.lines / n,
            },
        );
    }

    debug!(categories = categories.len(), "Parsed coverage summary");
    Ok(CoverageReport { categories })
}

fn categorize_path(path: &str) -> Option<&'static str> {
    if path.contains("/widgets/") || path.contains("\\widgets\\") {
        Some("widgets")
    } else if path.contains("/services/") || path.contains("\\services\\") {
        Some("services")
    } else if path.contains("integration") {
        Some("integration")
    } else {
        None
    }
}
