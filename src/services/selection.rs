//! Selective test selection.
//!
//! Two safety valves guard against an incomplete dependency graph:
//! any changed file matching a force-full pattern short-circuits to a
//! full run, and so does an estimated time saving below the configured
//! floor, where analysis overhead stops paying for itself.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::errors::PipelineResult;
use crate::domain::models::{DependencyMapping, SelectionConfig};
use crate::domain::ports::{DiffTarget, Vcs};

/// Result of the selection phase. `Full` is the "run everything"
/// sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Full,
    Subset(BTreeSet<String>),
}

impl Selection {
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Selects the test subset affected by a change set.
pub struct TestSelector {
    config: SelectionConfig,
}

impl TestSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    /// Resolve the diff target: an explicit PR base ref wins, then the
    /// previous revision when one exists, then the default branch.
    pub async fn resolve_diff_target(
        &self,
        vcs: &dyn Vcs,
        pr_base: Option<&str>,
    ) -> PipelineResult<DiffTarget> {
        if let Some(base) = pr_base {
            if let Some(merge_base) = vcs.merge_base(base).await? {
                return Ok(DiffTarget::PullRequestBase(merge_base));
            }
        }
        if vcs.merge_base("HEAD~1").await?.is_some() {
            return Ok(DiffTarget::PreviousRevision);
        }
        Ok(DiffTarget::DefaultBranch(
            self.config.default_branch.clone(),
        ))
    }

    /// Select the tests affected by `changed_files`.
    ///
    /// `all_tests` is the full known test corpus, used for always-run
    /// matching and the savings-floor computation.
    pub fn select(
        &self,
        changed_files: &[String],
        mapping: &DependencyMapping,
        all_tests: &[String],
    ) -> Selection {
        // Safety valve 1: force-full patterns.
        if let Some(trigger) = changed_files.iter().find(|f| self.is_force_full(f)) {
            info!(trigger = %trigger, "Force-full pattern matched, running everything");
            return Selection::Full;
        }

        let mut selected: BTreeSet<String> = BTreeSet::new();

        // Always-run critical suites, independent of the diff.
        for test in all_tests {
            if self
                .config
                .always_run
                .iter()
                .any(|pattern| test.contains(pattern.as_str()))
            {
                selected.insert(test.clone());
            }
        }

        for changed in changed_files {
            // Directly-changed test files.
            if self.is_test_file(changed) {
                selected.insert(changed.clone());
                continue;
            }

            // Tests mapped from the changed source.
            for test in mapping.tests_for_source(changed) {
                selected.insert(test);
            }

            // Heuristic: same-directory tests sharing the base name.
            for test in self.sibling_tests(changed, all_tests) {
                selected.insert(test);
            }
        }

        // Safety valve 2: abandon selective mode below the savings floor.
        if !all_tests.is_empty() {
            let savings = 1.0 - (selected.len() as f64 / all_tests.len() as f64);
            if savings < self.config.min_savings {
                info!(
                    selected = selected.len(),
                    total = all_tests.len(),
                    savings = format!("{:.0}%", savings * 100.0),
                    "Savings below floor, falling back to full run"
                );
                return Selection::Full;
            }
        }

        debug!(selected = selected.len(), "Selective test set computed");
        Selection::Subset(selected)
    }

    fn is_force_full(&self, path: &str) -> bool {
        self.config
            .force_full
            .iter()
            .any(|pattern| path.contains(pattern.as_str()))
    }

    fn is_test_file(&self, path: &str) -> bool {
        self.config.test_suffixes.iter().any(|s| path.ends_with(s))
    }

    /// Known tests in the changed file's directory sharing its stem,
    /// including a sibling `__tests__` directory.
    fn sibling_tests(&self, changed: &str, all_tests: &[String]) -> Vec<String> {
        let path = Path::new(changed);
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Vec::new();
        };
        let dir = path
            .parent()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();

        all_tests
            .iter()
            .filter(|test| {
                let test_path = Path::new(test.as_str());
                let Some(name) = test_path.file_name().and_then(|n| n.to_str()) else {
                    return false;
                };
                if !name.starts_with(&format!("{stem}.")) {
                    return false;
                }
                let test_dir = test_path
                    .parent()
                    .map(|d| d.to_string_lossy().into_owned())
                    .unwrap_or_default();
                test_dir == dir || test_dir == format!("{dir}/__tests__")
            })
            .cloned()
            .collect()
    }
}
