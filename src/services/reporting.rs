//! Report generation.
//!
//! Emits machine-readable artifacts (JSON, JUnit XML) and
//! human-readable summaries (Markdown, HTML, SVG badge) for a
//! completed run. Report generation is advisory: the orchestrator
//! logs generation errors as warnings and never fails a run over
//! them.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::domain::errors::PipelineResult;
use crate::domain::models::{PipelineOutcome, QualityResult, SessionOutcome, SessionRecord};

pub struct ReportGenerator {
    reports_dir: PathBuf,
}

/// Everything a report needs from one run.
pub struct ReportInputs<'a> {
    pub outcome: &'a PipelineOutcome,
    pub sessions: &'a [SessionRecord],
    pub quality: Option<&'a QualityResult>,
}

impl ReportGenerator {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Write every artifact, returning the paths produced.
    pub async fn generate_all(&self, inputs: &ReportInputs<'_>) -> PipelineResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.reports_dir).await?;

        let mut written = Vec::new();
        for (name, body) in [
            ("results.json", self.render_json(inputs)?),
            ("junit.xml", render_junit(inputs.sessions)),
            ("summary.md", render_markdown(inputs)),
            ("report.html", render_html(inputs)),
            ("badge.svg", render_badge(inputs.outcome.success)),
        ] {
            let path = self.reports_dir.join(name);
            tokio::fs::write(&path, body).await?;
            written.push(path);
        }

        info!(
            count = written.len(),
            dir = %self.reports_dir.display(),
            "Reports generated"
        );
        Ok(written)
    }

    fn render_json(&self, inputs: &ReportInputs<'_>) -> PipelineResult<String> {
        let doc = json!({
            "generated_at": Utc::now(),
            "outcome": inputs.outcome,
            "sessions": inputs.sessions,
            "quality": inputs.quality,
        });
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// JUnit-style XML: one testsuite per session, one testcase per test
/// file. A non-passing session marks all of its files failed with the
/// captured stderr attached.
fn render_junit(sessions: &[SessionRecord]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuites>\n");
    for session in sessions {
        let failed = !session.outcome.is_pass();
        let failures = if failed { session.spec.test_files.len() } else { 0 };
        let secs = session.duration_ms().unwrap_or(0) as f64 / 1000.0;
        xml.push_str(&format!(
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\">\n",
            xml_escape(&session.spec.name),
            session.spec.test_files.len(),
            failures,
            secs,
        ));
        for file in &session.spec.test_files {
            xml.push_str(&format!(
                "    <testcase name=\"{}\" classname=\"{}\"",
                xml_escape(file),
                xml_escape(&session.spec.name),
            ));
            if failed {
                xml.push_str(&format!(
                    ">\n      <failure message=\"session {}\">{}</failure>\n    </testcase>\n",
                    match session.outcome {
                        SessionOutcome::TimedOut => "timed out",
                        _ => "failed",
                    },
                    xml_escape(&session.stderr),
                ));
            } else {
                xml.push_str("/>\n");
            }
        }
        xml.push_str("  </testsuite>\n");
    }
    xml.push_str("</testsuites>\n");
    xml
}

fn render_markdown(inputs: &ReportInputs<'_>) -> String {
    let outcome = inputs.outcome;
    let mut md = String::from("# Pipeline Report\n\n");
    md.push_str(&format!(
        "- Status: **{}**\n- Duration: {:.1}s\n- Sessions: {}\n\n",
        if outcome.success { "PASSED" } else { "FAILED" },
        outcome.duration_ms as f64 / 1000.0,
        inputs.sessions.len(),
    ));

    if !inputs.sessions.is_empty() {
        md.push_str("## Sessions\n\n| Session | Outcome | Duration | Exit code |\n|---|---|---|---|\n");
        for session in inputs.sessions {
            md.push_str(&format!(
                "| {} | {:?} | {:.1}s | {} |\n",
                session.spec.name,
                session.outcome,
                session.duration_ms().unwrap_or(0) as f64 / 1000.0,
                session
                    .exit_code
                    .map_or_else(|| "-".to_string(), |c| c.to_string()),
            ));
        }
        md.push('\n');
    }

    if let Some(quality) = inputs.quality {
        md.push_str(&format!(
            "## Quality Gate\n\n- Score: {:.1}\n- Violations: {}\n- Passed: {}\n\n",
            quality.quality_score,
            quality.violations.len(),
            quality.passed,
        ));
        for violation in &quality.violations {
            md.push_str(&format!(
                "- `{}` {}: {:.1}% (threshold {:.1}%)\n",
                violation.category, violation.metric, violation.actual, violation.threshold,
            ));
        }
        if !quality.violations.is_empty() {
            md.push('\n');
        }
    }

    if !outcome.errors.is_empty() {
        md.push_str("## Errors\n\n");
        for error in &outcome.errors {
            md.push_str(&format!("- {error}\n"));
        }
        md.push('\n');
    }
    if !outcome.warnings.is_empty() {
        md.push_str("## Warnings\n\n");
        for warning in &outcome.warnings {
            md.push_str(&format!("- {warning}\n"));
        }
    }
    md
}

fn render_html(inputs: &ReportInputs<'_>) -> String {
    let status = if inputs.outcome.success {
        ("PASSED", "#2da44e")
    } else {
        ("FAILED", "#cf222e")
    };
    let mut rows = String::new();
    for session in inputs.sessions {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{:?}</td><td>{:.1}s</td></tr>",
            xml_escape(&session.spec.name),
            session.outcome,
            session.duration_ms().unwrap_or(0) as f64 / 1000.0,
        ));
    }
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Pipeline Report</title></head>\n\
         <body><h1>Pipeline Report</h1>\n\
         <p>Status: <strong style=\"color:{}\">{}</strong> in {:.1}s</p>\n\
         <table border=\"1\"><tr><th>Session</th><th>Outcome</th><th>Duration</th></tr>{}</table>\n\
         </body></html>\n",
        status.1,
        status.0,
        inputs.outcome.duration_ms as f64 / 1000.0,
        rows,
    )
}

fn render_badge(success: bool) -> String {
    let (label, color) = if success {
        ("passing", "#2da44e")
    } else {
        ("failing", "#cf222e")
    };
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"120\" height=\"20\">\n\
         <rect width=\"60\" height=\"20\" fill=\"#555\"/>\n\
         <rect x=\"60\" width=\"60\" height=\"20\" fill=\"{color}\"/>\n\
         <g fill=\"#fff\" text-anchor=\"middle\" font-family=\"Verdana\" font-size=\"11\">\n\
         <text x=\"30\" y=\"14\">pipeline</text>\n\
         <text x=\"90\" y=\"14\">{label}</text>\n\
         </g>\n</svg>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PortTriple, SessionSpec};
    use chrono::Duration;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn session(name: &str, outcome: SessionOutcome) -> SessionRecord {
        let started = Utc::now();
        SessionRecord {
            id: Uuid::new_v4(),
            spec: SessionSpec::new(
                name,
                vec![format!("{name}.test.ts")],
                "calm-harbor",
            ),
            ports: PortTriple {
                data_stream: 10110,
                api: 3100,
                transport: 8180,
            },
            started_at: started,
            ended_at: Some(started + Duration::seconds(12)),
            exit_code: Some(if outcome.is_pass() { 0 } else { 1 }),
            outcome,
            stdout: String::new(),
            stderr: "expected <5> but got \"4 & 1\"".to_string(),
        }
    }

    fn outcome(success: bool) -> PipelineOutcome {
        PipelineOutcome {
            success,
            duration_ms: 45_000,
            results: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_junit_escapes_and_counts_failures() {
        let sessions = vec![
            session("widgets", SessionOutcome::Passed),
            session("services", SessionOutcome::Failed),
        ];
        let xml = render_junit(&sessions);
        assert!(xml.contains("tests=\"1\" failures=\"0\""));
        assert!(xml.contains("tests=\"1\" failures=\"1\""));
        assert!(xml.contains("&quot;4 &amp; 1&quot;"));
        assert!(!xml.contains("<5>"));
    }

    #[test]
    fn test_markdown_includes_quality_section() {
        let o = outcome(true);
        let quality = QualityResult {
            coverage_score: Some(92.0),
            performance_passed: Some(true),
            marine_safety_passed: Some(true),
            quality_score: 96.8,
            violations: Vec::new(),
            passed: true,
        };
        let sessions = vec![session("widgets", SessionOutcome::Passed)];
        let md = render_markdown(&ReportInputs {
            outcome: &o,
            sessions: &sessions,
            quality: Some(&quality),
        });
        assert!(md.contains("**PASSED**"));
        assert!(md.contains("Score: 96.8"));
    }

    #[test]
    fn test_badge_reflects_status() {
        assert!(render_badge(true).contains("passing"));
        assert!(render_badge(false).contains("failing"));
    }

    #[tokio::test]
    async fn test_generate_all_writes_five_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path());
        let o = outcome(false);
        let sessions = vec![session("widgets", SessionOutcome::TimedOut)];
        let paths = generator
            .generate_all(&ReportInputs {
                outcome: &o,
                sessions: &sessions,
                quality: None,
            })
            .await
            .unwrap();
        assert_eq!(paths.len(), 5);
        for path in paths {
            assert!(path.exists());
        }
    }
}
