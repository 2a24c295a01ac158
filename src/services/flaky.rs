//! Flaky failure classification and retry-driven recovery.
//!
//! A failure is matched against an ordered pattern set; the first hit
//! makes it retry-eligible with a pattern-specific base confidence.
//! Independently, a historical success rate inside
//! `[flaky_threshold, 1.0)` also flags the test. Retries use a fixed
//! delay, never exponential backoff: the failures being retried are
//! environmental, and spreading them out does not make them rarer.

use chrono::Utc;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::errors::PipelineResult;
use crate::domain::models::{FlakyConfig, TestHistory, TestHistoryEntry};
use crate::domain::ports::{FlakyScorer, FlakyVerdict};
use crate::services::session::SessionManager;

/// Name markers that bump confidence: these suites exercise real
/// processes and are intrinsically noisier.
const DOMAIN_MARKERS: [&str; 3] = ["integration", "e2e", "simulator"];

/// One ordered failure pattern with its base confidence.
struct FailurePattern {
    name: &'static str,
    regex: Regex,
    base_confidence: f64,
}

/// Default heuristic scorer. Pattern order and constants mirror the
/// observed CI failure taxonomy; the trait boundary exists so they can
/// be recalibrated against real history without touching the retry loop.
pub struct PatternScorer {
    patterns: Vec<FailurePattern>,
    flaky_threshold: f64,
}

impl PatternScorer {
    pub fn new(flaky_threshold: f64) -> Self {
        let patterns = vec![
            FailurePattern {
                name: "timeout",
                regex: Regex::new(r"(?i)\btimed?\s*out\b|exceeded.*timeout").expect("static regex"),
                base_confidence: 0.9,
            },
            FailurePattern {
                name: "network",
                regex: Regex::new(r"(?i)ECONNREFUSED|ECONNRESET|ENOTFOUND|EADDRINUSE|socket hang up|network error")
                    .expect("static regex"),
                base_confidence: 0.85,
            },
            FailurePattern {
                name: "timing",
                regex: Regex::new(r"(?i)\brace\b|not wrapped in act|stale element|animation frame|debounce")
                    .expect("static regex"),
                base_confidence: 0.95,
            },
            FailurePattern {
                name: "resource",
                regex: Regex::new(r"(?i)out of memory|heap limit|EMFILE|ENFILE|resource temporarily unavailable")
                    .expect("static regex"),
                base_confidence: 0.70,
            },
            FailurePattern {
                name: "simulator",
                regex: Regex::new(r"(?i)simulator (unavailable|not ready|disconnected)|NMEA stream")
                    .expect("static regex"),
                base_confidence: 0.80,
            },
        ];
        Self {
            patterns,
            flaky_threshold,
        }
    }
}

impl FlakyScorer for PatternScorer {
    fn score(
        &self,
        test_id: &str,
        failure_text: &str,
        history: Option<&TestHistoryEntry>,
    ) -> FlakyVerdict {
        let mut verdict = FlakyVerdict::not_flaky("no pattern matched");

        if let Some(pattern) = self
            .patterns
            .iter()
            .find(|p| p.regex.is_match(failure_text))
        {
            let mut confidence = pattern.base_confidence;
            let lowered = test_id.to_lowercase();
            if DOMAIN_MARKERS.iter().any(|m| lowered.contains(m)) {
                confidence = (confidence + 0.10).min(1.0);
            }
            verdict = FlakyVerdict {
                is_flaky: true,
                confidence,
                matched_pattern: Some(pattern.name.to_string()),
                reason: format!("failure text matched '{}' pattern", pattern.name),
            };
        }

        // History check is independent of pattern matching. A rate of
        // exactly 1.0 never classifies: the test has never failed.
        if let Some(entry) = history {
            let rate = entry.success_rate();
            if rate >= self.flaky_threshold && rate < 1.0 {
                verdict = FlakyVerdict {
                    is_flaky: true,
                    confidence: verdict.confidence.max(rate),
                    matched_pattern: verdict.matched_pattern,
                    reason: format!(
                        "historical success rate {rate:.2} within flaky band (was: {})",
                        verdict.reason
                    ),
                };
            }
        }

        verdict
    }
}

/// Remediation urgency band for a flaky test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlakySeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl FlakySeverity {
    /// Severity from success rate: `<50%` critical, `<70%` high,
    /// `<90%` medium, else low.
    pub fn from_rate(rate: f64) -> Self {
        if rate < 0.5 {
            Self::Critical
        } else if rate < 0.7 {
            Self::High
        } else if rate < 0.9 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub const fn recommendation(self) -> &'static str {
        match self {
            Self::Critical => "quarantine immediately and rewrite",
            Self::High => "investigate this sprint; likely a real race",
            Self::Medium => "add diagnostics and watch the trend",
            Self::Low => "monitor; acceptable for now",
        }
    }
}

/// One row of the flaky report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FlakyReportEntry {
    pub test_id: String,
    pub success_rate: f64,
    pub total_executions: u64,
    pub severity: FlakySeverity,
    pub recommendation: String,
}

/// Outcome of one execution attempt, fed back into history.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub passed: bool,
    pub duration_ms: u64,
    /// Combined error and output text for pattern matching
    pub failure_text: String,
}

/// Result of a retry loop for one test.
#[derive(Debug, Clone)]
pub struct RetryResult {
    pub test_id: String,
    pub passed: bool,
    pub attempts: u32,
    pub final_verdict: Option<FlakyVerdict>,
}

/// Classifier plus rolling history and the retry loop.
pub struct FlakyClassifier {
    config: FlakyConfig,
    scorer: Box<dyn FlakyScorer>,
    history: TestHistory,
}

impl FlakyClassifier {
    pub fn new(config: FlakyConfig) -> Self {
        let scorer = Box::new(PatternScorer::new(config.threshold));
        Self {
            config,
            scorer,
            history: TestHistory::default(),
        }
    }

    /// Swap in a different scoring heuristic.
    pub fn with_scorer(mut self, scorer: Box<dyn FlakyScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Seed previously persisted history.
    pub fn load_history(&mut self, history: TestHistory) {
        self.history = history;
    }

    pub fn history(&self) -> &TestHistory {
        &self.history
    }

    /// Classify one observed failure.
    pub fn analyze_failure(&self, test_id: &str, failure_text: &str) -> FlakyVerdict {
        let entry = self.history.entries.get(test_id);
        self.scorer.score(test_id, failure_text, entry)
    }

    /// Fold one attempt into the test's rolling statistics. Every
    /// attempt counts, retry or not.
    pub fn record_attempt(&mut self, test_id: &str, passed: bool, duration_ms: u64) {
        let now = Utc::now();
        self.history
            .entries
            .entry(test_id.to_string())
            .or_insert_with(|| TestHistoryEntry::new(now))
            .record(passed, duration_ms, now);
    }

    /// Whether a failed attempt should be retried.
    pub fn should_retry(&self, verdict: &FlakyVerdict, attempt: u32) -> bool {
        attempt < self.config.max_retries
            && verdict.is_flaky
            && verdict.confidence > self.config.confidence_floor
    }

    /// Run `attempt_fn` up to `max_retries` times, retrying only when
    /// the failure classifies as flaky above the confidence floor, with
    /// a fixed delay between attempts.
    pub async fn execute_with_retry<F>(
        &mut self,
        test_id: &str,
        sessions: &mut SessionManager,
        mut attempt_fn: F,
    ) -> PipelineResult<RetryResult>
    where
        F: for<'a> FnMut(&'a mut SessionManager, u32) -> BoxFuture<'a, PipelineResult<AttemptOutcome>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = attempt_fn(sessions, attempt).await?;
            self.record_attempt(test_id, outcome.passed, outcome.duration_ms);

            if outcome.passed {
                if attempt > 1 {
                    info!(test_id = test_id, attempt = attempt, "Flaky test recovered on retry");
                }
                return Ok(RetryResult {
                    test_id: test_id.to_string(),
                    passed: true,
                    attempts: attempt,
                    final_verdict: None,
                });
            }

            let verdict = self.analyze_failure(test_id, &outcome.failure_text);
            debug!(
                test_id = test_id,
                attempt = attempt,
                is_flaky = verdict.is_flaky,
                confidence = verdict.confidence,
                "Failure classified"
            );

            if !self.should_retry(&verdict, attempt) {
                return Ok(RetryResult {
                    test_id: test_id.to_string(),
                    passed: false,
                    attempts: attempt,
                    final_verdict: Some(verdict),
                });
            }

            tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
        }
    }

    /// Flaky report: tests with success rate in `[threshold, 1.0)`,
    /// sorted ascending so the worst offenders lead.
    pub fn report(&self) -> Vec<FlakyReportEntry> {
        let mut entries: Vec<FlakyReportEntry> = self
            .history
            .entries
            .iter()
            .filter_map(|(test_id, entry)| {
                let rate = entry.success_rate();
                if rate >= self.config.threshold && rate < 1.0 {
                    let severity = FlakySeverity::from_rate(rate);
                    Some(FlakyReportEntry {
                        test_id: test_id.clone(),
                        success_rate: rate,
                        total_executions: entry.total_executions,
                        severity,
                        recommendation: severity.recommendation().to_string(),
                    })
                } else {
                    None
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            a.success_rate
                .partial_cmp(&b.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries
    }

    /// Prune entries idle past the retention window. Returns the count
    /// removed.
    pub fn prune_history(&mut self) -> usize {
        self.history
            .prune(self.config.history_retention_days, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FlakyClassifier {
        FlakyClassifier::new(FlakyConfig::default())
    }

    #[test]
    fn test_timeout_pattern_matches() {
        let c = classifier();
        let verdict = c.analyze_failure("DepthWidget.test.tsx", "Error: test timed out after 5000ms");
        assert!(verdict.is_flaky);
        assert_eq!(verdict.matched_pattern.as_deref(), Some("timeout"));
        assert!((verdict.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timing_has_highest_base_confidence() {
        let c = classifier();
        let verdict = c.analyze_failure("Gauge.test.tsx", "detected a race between render and update");
        assert!((verdict.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_domain_marker_boost() {
        let c = classifier();
        let plain = c.analyze_failure("Gauge.test.tsx", "connection ECONNREFUSED 127.0.0.1:3100");
        let boosted = c.analyze_failure(
            "integration/Gauge.test.tsx",
            "connection ECONNREFUSED 127.0.0.1:3100",
        );
        assert!((plain.confidence - 0.85).abs() < f64::EPSILON);
        assert!((boosted.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_boost_caps_at_one() {
        let c = classifier();
        let verdict = c.analyze_failure("e2e/Chart.test.tsx", "race condition in effect cleanup");
        assert!(verdict.confidence <= 1.0);
        assert!((verdict.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_band_is_inclusive_at_threshold() {
        // {successes: 8, failures: 2} at threshold 0.8 -> rate exactly
        // 0.8, which is inside the band.
        let mut c = classifier();
        for _ in 0..8 {
            c.record_attempt("WindGauge.test.tsx", true, 100);
        }
        for _ in 0..2 {
            c.record_attempt("WindGauge.test.tsx", false, 100);
        }

        let verdict = c.analyze_failure("WindGauge.test.tsx", "assertion failed: expected 4 knots");
        assert!(verdict.is_flaky);
        assert!((verdict.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_perfect_history_never_classifies() {
        let mut c = classifier();
        for _ in 0..20 {
            c.record_attempt("Compass.test.tsx", true, 50);
        }
        let verdict = c.analyze_failure("Compass.test.tsx", "assertion failed");
        assert!(!verdict.is_flaky);
    }

    #[test]
    fn test_history_confidence_takes_max() {
        let mut c = classifier();
        // Rate 0.9 with a network pattern (0.85): history wins.
        for _ in 0..9 {
            c.record_attempt("Net.test.tsx", true, 10);
        }
        c.record_attempt("Net.test.tsx", false, 10);

        let verdict = c.analyze_failure("Net.test.tsx", "socket hang up");
        assert!(verdict.is_flaky);
        assert!((verdict.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_retry_respects_confidence_floor() {
        let c = classifier();
        let low = FlakyVerdict {
            is_flaky: true,
            confidence: 0.6,
            matched_pattern: Some("resource".to_string()),
            reason: String::new(),
        };
        let high = FlakyVerdict {
            is_flaky: true,
            confidence: 0.9,
            matched_pattern: Some("timeout".to_string()),
            reason: String::new(),
        };
        assert!(!c.should_retry(&low, 1));
        assert!(c.should_retry(&high, 1));
        assert!(!c.should_retry(&high, 3), "attempt == max_retries must stop");
    }

    #[tokio::test]
    async fn test_retry_loop_bounded_by_max_retries() {
        let mut config = FlakyConfig::default();
        config.retry_delay_ms = 1;
        let mut c = FlakyClassifier::new(config);
        let mut sessions = SessionManager::new(crate::domain::models::Config::default());

        let mut calls = 0u32;
        let result = c
            .execute_with_retry("e2e/Engine.test.tsx", &mut sessions, |_mgr, _attempt| {
                calls += 1;
                Box::pin(async {
                    Ok(AttemptOutcome {
                        passed: false,
                        duration_ms: 5,
                        failure_text: "request timed out".to_string(),
                    })
                }) as BoxFuture<'_, _>
            })
            .await
            .unwrap();

        assert!(!result.passed);
        assert_eq!(result.attempts, 3);
        assert_eq!(calls, 3);
        // Every attempt updated history, retries included.
        assert_eq!(
            c.history().entries["e2e/Engine.test.tsx"].total_executions,
            3
        );
    }

    #[tokio::test]
    async fn test_retry_loop_stops_on_success() {
        let mut config = FlakyConfig::default();
        config.retry_delay_ms = 1;
        let mut c = FlakyClassifier::new(config);
        let mut sessions = SessionManager::new(crate::domain::models::Config::default());

        let result = c
            .execute_with_retry("integration/Ais.test.tsx", &mut sessions, |_mgr, attempt| {
                Box::pin(async move {
                    Ok(AttemptOutcome {
                        passed: attempt == 2,
                        duration_ms: 5,
                        failure_text: "socket hang up".to_string(),
                    })
                }) as BoxFuture<'_, _>
            })
            .await
            .unwrap();

        assert!(result.passed);
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn test_report_sorted_ascending_with_bands() {
        let mut config = FlakyConfig::default();
        config.threshold = 0.4;
        let mut c = FlakyClassifier::new(config);

        // 45% -> critical band
        for _ in 0..9 {
            c.record_attempt("a.test.ts", true, 1);
        }
        for _ in 0..11 {
            c.record_attempt("a.test.ts", false, 1);
        }
        // 80% -> medium band
        for _ in 0..8 {
            c.record_attempt("b.test.ts", true, 1);
        }
        for _ in 0..2 {
            c.record_attempt("b.test.ts", false, 1);
        }
        // 95% -> low band
        for _ in 0..19 {
            c.record_attempt("c.test.ts", true, 1);
        }
        c.record_attempt("c.test.ts", false, 1);

        let report = c.report();
        assert_eq!(report.len(), 3);
        assert_eq!(report[0].test_id, "a.test.ts");
        assert_eq!(report[0].severity, FlakySeverity::Critical);
        assert_eq!(report[1].severity, FlakySeverity::Medium);
        assert_eq!(report[2].severity, FlakySeverity::Low);
        assert!(report[0].success_rate <= report[1].success_rate);
    }
}
