//! Pipeline orchestrator.
//!
//! Sequences the full run through its deterministic phase order:
//! setup, resource-optimization, simulator-setup, test-execution,
//! quality-gates, reporting, cleanup, with the bracketed phases gated
//! by feature flags. The orchestrator is the single owner of the
//! mutable `PipelineState`; every other component returns results.
//!
//! Failure handling follows three classes: fatal infrastructure
//! errors abort immediately, test failures are routed through flaky
//! retry first, and report generation is advisory. Any phase error
//! triggers best-effort failure analysis and forced cleanup, and
//! neither may replace the original error.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::models::{
    Config, DependencyMapping, PhaseKind, PhaseStatus, PipelineOutcome, PipelineState,
    QualityResult, SessionRecord, SessionSpec, TestHistory,
};
use crate::domain::ports::{keys, StateStore, StateStoreExt, Vcs};
use crate::infrastructure::git::GitCli;
use crate::infrastructure::store::JsonStateStore;
use crate::services::dependency_graph::DependencyGraphIndexer;
use crate::services::failure::FailureAnalyzer;
use crate::services::flaky::{AttemptOutcome, FlakyClassifier};
use crate::services::quality::QualityGateEvaluator;
use crate::services::reporting::{ReportGenerator, ReportInputs};
use crate::services::resources::ResourceGovernor;
use crate::services::selection::{Selection, TestSelector};
use crate::services::session::SessionManager;
use crate::services::simulator::SimulatorLifecycleManager;

/// Per-run options from the CLI.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Pull-request base ref for selective testing
    pub pr_base: Option<String>,
    /// Skip selection and run the full corpus
    pub full: bool,
    /// Read the coverage summary and gate on it
    pub coverage: bool,
}

pub struct PipelineOrchestrator {
    config: Config,
    project_root: PathBuf,
    options: RunOptions,
    store: JsonStateStore,
    sessions: SessionManager,
    classifier: FlakyClassifier,
    governor: Option<ResourceGovernor>,
    governor_task: Option<tokio::task::JoinHandle<PipelineResult<()>>>,
    state: PipelineState,
    parallelism: usize,
    quality: Option<QualityResult>,
    run_started: Option<Instant>,
}

impl PipelineOrchestrator {
    pub fn new(config: Config, project_root: impl Into<PathBuf>, options: RunOptions) -> Self {
        let project_root = project_root.into();
        let store = JsonStateStore::new(project_root.join(&config.state_dir));
        let sessions = SessionManager::new(config.clone());
        let classifier = FlakyClassifier::new(config.flaky.clone());
        let parallelism = config.session.max_parallel;

        Self {
            config,
            project_root,
            options,
            store,
            sessions,
            classifier,
            governor: None,
            governor_task: None,
            state: PipelineState::new(),
            parallelism,
            quality: None,
            run_started: None,
        }
    }

    /// Run the pipeline end to end. Never panics on phase failure;
    /// the returned outcome carries every error and warning.
    pub async fn run(&mut self) -> PipelineOutcome {
        let started = Instant::now();
        self.run_started = Some(started);
        info!(project = %self.project_root.display(), "Pipeline starting");

        let result = self.run_phases().await;

        if let Err(ref error) = result {
            self.state.errors.push(error.to_string());

            // Best-effort analysis; its own failures are logged only.
            let analyzer =
                FailureAnalyzer::new(self.project_root.join(&self.config.reports_dir));
            if let Err(e) = analyzer
                .analyze(error, &self.state, self.sessions.records())
                .await
            {
                warn!(error = %e, "Failure analysis itself failed");
            }

            self.state.begin_phase(PhaseKind::Cleanup);
            self.force_cleanup().await;
            self.state
                .end_phase(PhaseKind::Cleanup, PhaseStatus::Completed, None);
        }

        let success = result.is_ok();
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(success, duration_ms, "Pipeline finished");

        let outcome = PipelineOutcome {
            success,
            duration_ms,
            results: self.state.results.clone(),
            errors: self.state.errors.clone(),
            warnings: self.state.warnings.clone(),
        };

        if let Err(e) = self.store.save(keys::PIPELINE_RESULTS, &outcome).await {
            warn!(error = %e, "Could not persist pipeline results");
        }
        outcome
    }

    async fn run_phases(&mut self) -> PipelineResult<()> {
        self.phase(PhaseKind::Setup, true).await?;
        self.phase(
            PhaseKind::ResourceOptimization,
            self.config.features.resource_optimization,
        )
        .await?;
        self.phase(
            PhaseKind::SimulatorSetup,
            self.config.features.simulator_setup,
        )
        .await?;
        self.phase(PhaseKind::TestExecution, true).await?;
        self.phase(PhaseKind::QualityGates, self.config.features.quality_gates)
            .await?;
        self.phase(PhaseKind::Reporting, self.config.features.reporting)
            .await?;
        self.phase(PhaseKind::Cleanup, true).await?;
        Ok(())
    }

    async fn phase(&mut self, kind: PhaseKind, enabled: bool) -> PipelineResult<()> {
        if !enabled {
            info!(phase = kind.as_str(), "Phase disabled, skipping");
            self.state.begin_phase(kind);
            self.state.end_phase(kind, PhaseStatus::Skipped, None);
            return Ok(());
        }

        info!(phase = kind.as_str(), "Phase starting");
        self.state.begin_phase(kind);
        let result = match kind {
            PhaseKind::Setup => self.phase_setup().await,
            PhaseKind::ResourceOptimization => self.phase_resource_optimization().await,
            PhaseKind::SimulatorSetup => self.phase_simulator_setup().await,
            PhaseKind::TestExecution => self.phase_test_execution().await,
            PhaseKind::QualityGates => self.phase_quality_gates().await,
            PhaseKind::Reporting => self.phase_reporting().await,
            PhaseKind::Cleanup => self.phase_cleanup().await,
        };

        match result {
            Ok(()) => {
                self.state.end_phase(kind, PhaseStatus::Completed, None);
                Ok(())
            }
            Err(e) => {
                self.state
                    .end_phase(kind, PhaseStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn phase_setup(&mut self) -> PipelineResult<()> {
        if !self.project_root.exists() {
            return Err(PipelineError::ExecutionFailed(format!(
                "project root {} does not exist",
                self.project_root.display()
            )));
        }
        tokio::fs::create_dir_all(self.project_root.join(&self.config.state_dir)).await?;
        tokio::fs::create_dir_all(self.project_root.join(&self.config.reports_dir)).await?;

        if let Some(history) = self.store.load::<TestHistory>(keys::TEST_HISTORY).await? {
            info!(tests = history.entries.len(), "Loaded test history");
            self.classifier.load_history(history);
        }
        let pruned = self.classifier.prune_history();
        if pruned > 0 {
            info!(pruned, "Pruned stale test history entries");
        }
        Ok(())
    }

    async fn phase_resource_optimization(&mut self) -> PipelineResult<()> {
        let governor = ResourceGovernor::new(self.config.resources.clone());
        let recommended = governor.recommend_parallelism().await;
        self.parallelism = recommended.min(self.config.session.max_parallel);

        self.governor_task = Some(governor.start());
        self.governor = Some(governor);

        info!(
            recommended,
            effective = self.parallelism,
            "Resource governor sized parallelism"
        );
        self.state.record_result(
            "resources",
            json!({ "recommended_parallelism": recommended, "effective_parallelism": self.parallelism }),
        );
        Ok(())
    }

    /// Preflight: boot one simulator to Running and tear it down, so a
    /// broken simulator binary or scenario fails fast here instead of
    /// mid-execution.
    async fn phase_simulator_setup(&mut self) -> PipelineResult<()> {
        let mut simulator = SimulatorLifecycleManager::new(
            self.config.simulator.clone(),
            self.config.ports.clone(),
        );
        let ports = simulator.start(&self.config.simulator.scenario).await?;
        let healthy = simulator.health_check().await;
        simulator.stop().await?;

        if !healthy {
            return Err(PipelineError::SimulatorUnhealthy(
                "preflight simulator failed its health check".to_string(),
            ));
        }
        self.state.record_result(
            "simulator_preflight",
            json!({ "healthy": true, "ports": ports.as_array() }),
        );
        Ok(())
    }

    async fn phase_test_execution(&mut self) -> PipelineResult<()> {
        let indexer =
            DependencyGraphIndexer::new(self.config.selection.clone(), &self.project_root);
        let all_tests = indexer.enumerate_test_files()?;
        if all_tests.is_empty() {
            warn!("No test files found, nothing to execute");
            self.state
                .record_result("execution", json!({ "sessions": 0, "tests": 0 }));
            return Ok(());
        }

        let mapping = self.load_or_build_mapping(&indexer).await?;
        let selected = self.select_tests(&mapping, &all_tests).await;

        let (tests, mode) = match &selected {
            Selection::Full => (all_tests.clone(), "full"),
            Selection::Subset(set) if set.is_empty() => {
                warn!("Selection produced no tests, falling back to full run");
                (all_tests.clone(), "full")
            }
            Selection::Subset(set) => (set.iter().cloned().collect(), "selective"),
        };
        self.state.record_result(
            "selection",
            json!({ "mode": mode, "selected": tests.len(), "total": all_tests.len() }),
        );

        let groups = if self.config.features.parallel_sessions {
            self.parallelism.max(1)
        } else {
            1
        };
        let specs = chunk_into_sessions(&tests, groups, &self.config.simulator.scenario);
        info!(
            tests = tests.len(),
            sessions = specs.len(),
            mode,
            "Executing test sessions"
        );

        let mut failed_files: BTreeSet<String> = BTreeSet::new();
        for wave in specs.chunks(groups.max(1)) {
            let mut active = Vec::new();
            for spec in wave {
                active.push(self.sessions.start_session(spec.clone()).await?);
            }
            let records =
                futures::future::join_all(active.into_iter().map(|session| session.run())).await;
            for record in records {
                if !record.outcome.is_pass() {
                    failed_files.extend(record.spec.test_files.iter().cloned());
                }
                for file in &record.spec.test_files {
                    self.classifier.record_attempt(
                        file,
                        record.outcome.is_pass(),
                        u64::try_from(record.duration_ms().unwrap_or(0)).unwrap_or(0),
                    );
                }
                self.sessions.finish_session(record);
            }
        }

        let mut still_failing = 0usize;
        let mut retried = 0usize;
        if !failed_files.is_empty() {
            info!(
                failed = failed_files.len(),
                "Routing failed tests through flaky retry"
            );
            let scenario = self.config.simulator.scenario.clone();
            let classifier = &mut self.classifier;
            let sessions = &mut self.sessions;

            for file in &failed_files {
                retried += 1;
                let spec = SessionSpec::new(retry_session_name(file), vec![file.clone()], &scenario);
                let result = classifier
                    .execute_with_retry(file, sessions, move |mgr, _attempt| {
                        let spec = spec.clone();
                        Box::pin(async move {
                            let active = mgr.start_session(spec).await?;
                            let record = active.run().await;
                            let outcome = AttemptOutcome {
                                passed: record.outcome.is_pass(),
                                duration_ms: u64::try_from(record.duration_ms().unwrap_or(0))
                                    .unwrap_or(0),
                                failure_text: format!("{}\n{}", record.stdout, record.stderr),
                            };
                            mgr.finish_session(record);
                            Ok(outcome)
                        }) as BoxFuture<'_, _>
                    })
                    .await?;
                if !result.passed {
                    still_failing += 1;
                }
            }
        }

        self.persist_execution_state().await;
        self.state.record_result(
            "execution",
            json!({
                "sessions": self.sessions.records().len(),
                "tests": tests.len(),
                "failed": failed_files.len(),
                "retried": retried,
                "still_failing": still_failing,
            }),
        );

        if still_failing > 0 {
            return Err(PipelineError::TestsFailed {
                failed: still_failing,
                total: tests.len(),
            });
        }
        Ok(())
    }

    async fn load_or_build_mapping(
        &mut self,
        indexer: &DependencyGraphIndexer,
    ) -> PipelineResult<DependencyMapping> {
        if let Some(mapping) = self
            .store
            .load::<DependencyMapping>(keys::DEPENDENCY_MAPPING)
            .await?
        {
            if !mapping.is_stale(self.config.selection.mapping_max_age_hours, chrono::Utc::now()) {
                info!(edges = mapping.edge_count(), "Using persisted dependency mapping");
                return Ok(mapping);
            }
        }

        let mapping = indexer.build()?;
        self.store.save(keys::DEPENDENCY_MAPPING, &mapping).await?;
        info!(edges = mapping.edge_count(), "Dependency mapping rebuilt");
        Ok(mapping)
    }

    /// Resolve the diff and select tests. Any version-control error
    /// degrades to a full run; selection must never fail the pipeline.
    async fn select_tests(
        &mut self,
        mapping: &DependencyMapping,
        all_tests: &[String],
    ) -> Selection {
        if self.options.full || !self.config.features.selective_testing {
            return Selection::Full;
        }

        let selector = TestSelector::new(self.config.selection.clone());
        let vcs = GitCli::new(&self.project_root);

        let target = match selector
            .resolve_diff_target(&vcs, self.options.pr_base.as_deref())
            .await
        {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Could not resolve diff target, running everything");
                self.state
                    .warnings
                    .push(format!("selective testing disabled: {e}"));
                return Selection::Full;
            }
        };

        match vcs.changed_files(&target).await {
            Ok(changed) => selector.select(&changed, mapping, all_tests),
            Err(e) => {
                warn!(error = %e, "Could not enumerate changed files, running everything");
                self.state
                    .warnings
                    .push(format!("selective testing disabled: {e}"));
                Selection::Full
            }
        }
    }

    async fn phase_quality_gates(&mut self) -> PipelineResult<()> {
        let evaluator = QualityGateEvaluator::new(self.config.quality.clone());
        let coverage = if self.options.coverage {
            let loaded = evaluator.load_coverage(&self.project_root).await?;
            if loaded.is_none() {
                self.state
                    .warnings
                    .push("coverage summary not found".to_string());
            }
            loaded
        } else {
            None
        };

        let records = self.sessions.records();
        let performance = suite_signal(records, "performance");
        let safety = suite_signal(records, "safety");

        let result = evaluator.evaluate(coverage.as_ref(), performance, safety);
        self.state
            .record_result("quality", serde_json::to_value(&result)?);

        let passed = result.passed;
        let score = result.quality_score;
        let violations = result.violations.len();
        self.quality = Some(result);

        if !passed {
            return Err(PipelineError::QualityGateFailed { score, violations });
        }
        Ok(())
    }

    async fn phase_reporting(&mut self) -> PipelineResult<()> {
        let generator = ReportGenerator::new(self.project_root.join(&self.config.reports_dir));
        let outcome = PipelineOutcome {
            success: !self.state.any_phase_failed(),
            duration_ms: self
                .run_started
                .map_or(0, |s| s.elapsed().as_millis() as u64),
            results: self.state.results.clone(),
            errors: self.state.errors.clone(),
            warnings: self.state.warnings.clone(),
        };
        let inputs = ReportInputs {
            outcome: &outcome,
            sessions: self.sessions.records(),
            quality: self.quality.as_ref(),
        };

        // Advisory: a report failure is a warning, never an abort.
        match generator.generate_all(&inputs).await {
            Ok(paths) => {
                let rendered: Vec<String> =
                    paths.iter().map(|p| p.display().to_string()).collect();
                self.state.record_result("reports", json!(rendered));
            }
            Err(e) => {
                warn!(error = %e, "Report generation failed");
                self.state
                    .warnings
                    .push(format!("report generation failed: {e}"));
            }
        }
        Ok(())
    }

    async fn phase_cleanup(&mut self) -> PipelineResult<()> {
        self.force_cleanup().await;
        Ok(())
    }

    /// Tear everything down. Used both by the normal cleanup phase and
    /// the failure path; must not return an error.
    async fn force_cleanup(&mut self) {
        if let Some(governor) = self.governor.take() {
            if let Err(e) = governor.shutdown() {
                warn!(error = %e, "Governor shutdown signal failed");
            }
        }
        if let Some(task) = self.governor_task.take() {
            task.abort();
        }

        self.sessions.stop_all(Vec::new()).await;

        if let Err(e) = self
            .store
            .save(keys::TEST_HISTORY, self.classifier.history())
            .await
        {
            warn!(error = %e, "Could not persist test history");
        }
        if let Err(e) = self.store.remove(keys::PORT_ALLOCATION).await {
            warn!(error = %e, "Could not clear persisted port allocations");
        }
        info!("Cleanup complete");
    }

    async fn persist_execution_state(&mut self) {
        if let Err(e) = self
            .store
            .save(keys::TEST_HISTORY, self.classifier.history())
            .await
        {
            warn!(error = %e, "Could not persist test history");
        }
        let snapshot = self.sessions.port_snapshot();
        if let Err(e) = self.store.save(keys::PORT_ALLOCATION, &snapshot).await {
            warn!(error = %e, "Could not persist port allocations");
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn session_records(&self) -> &[SessionRecord] {
        self.sessions.records()
    }
}

/// Split `tests` into at most `groups` session specs of roughly equal
/// size, preserving order.
pub fn chunk_into_sessions(tests: &[String], groups: usize, scenario: &str) -> Vec<SessionSpec> {
    if tests.is_empty() {
        return Vec::new();
    }
    let groups = groups.clamp(1, tests.len());
    let chunk_size = tests.len().div_ceil(groups);

    tests
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| {
            SessionSpec::new(format!("session-{i}"), chunk.to_vec(), scenario)
        })
        .collect()
}

/// Verdict of a marker-named suite: `Some(all passed)` when any
/// executed session carried a matching test file, `None` otherwise.
fn suite_signal(records: &[SessionRecord], marker: &str) -> Option<bool> {
    let mut seen = false;
    let mut all_passed = true;
    for record in records {
        if record
            .spec
            .test_files
            .iter()
            .any(|f| f.to_lowercase().contains(marker))
        {
            seen = true;
            all_passed &= record.outcome.is_pass();
        }
    }
    seen.then_some(all_passed)
}

fn retry_session_name(file: &str) -> String {
    let stem = file
        .rsplit('/')
        .next()
        .unwrap_or(file)
        .split('.')
        .next()
        .unwrap_or(file);
    format!("retry-{stem}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PortTriple, SessionOutcome};
    use chrono::Utc;
    use uuid::Uuid;

    fn record(files: Vec<&str>, outcome: SessionOutcome) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            spec: SessionSpec::new(
                "s",
                files.into_iter().map(String::from).collect(),
                "calm-harbor",
            ),
            ports: PortTriple {
                data_stream: 10110,
                api: 3100,
                transport: 8180,
            },
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            exit_code: Some(0),
            outcome,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_chunking_balances_groups() {
        let tests: Vec<String> = (0..10).map(|i| format!("t{i}.test.ts")).collect();
        let specs = chunk_into_sessions(&tests, 4, "calm-harbor");
        assert_eq!(specs.len(), 4);
        let total: usize = specs.iter().map(|s| s.test_files.len()).sum();
        assert_eq!(total, 10);
        assert_eq!(specs[0].name, "session-0");
    }

    #[test]
    fn test_chunking_never_exceeds_test_count() {
        let tests = vec!["a.test.ts".to_string()];
        let specs = chunk_into_sessions(&tests, 8, "calm-harbor");
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn test_chunking_empty_corpus() {
        assert!(chunk_into_sessions(&[], 4, "calm-harbor").is_empty());
    }

    #[test]
    fn test_suite_signal_absent_when_no_marker() {
        let records = vec![record(vec!["widgets/a.test.ts"], SessionOutcome::Passed)];
        assert_eq!(suite_signal(&records, "performance"), None);
    }

    #[test]
    fn test_suite_signal_reflects_outcomes() {
        let records = vec![
            record(vec!["performance/load.test.ts"], SessionOutcome::Passed),
            record(vec!["performance/soak.test.ts"], SessionOutcome::Failed),
        ];
        assert_eq!(suite_signal(&records, "performance"), Some(false));

        let records = vec![record(
            vec!["safety/mob-alert.test.ts"],
            SessionOutcome::Passed,
        )];
        assert_eq!(suite_signal(&records, "safety"), Some(true));
    }

    #[test]
    fn test_retry_session_name() {
        assert_eq!(
            retry_session_name("src/widgets/DepthWidget.test.tsx"),
            "retry-DepthWidget"
        );
    }
}
