//! Service layer: the pipeline components and their orchestration.

pub mod dependency_graph;
pub mod failure;
pub mod flaky;
pub mod orchestrator;
pub mod ports;
pub mod quality;
pub mod reporting;
pub mod resources;
pub mod selection;
pub mod session;
pub mod simulator;

pub use dependency_graph::{DependencyGraphIndexer, RegexImportExtractor};
pub use failure::{FailureAnalyzer, FailureReport, RootCause};
pub use flaky::{FlakyClassifier, FlakyReportEntry, FlakySeverity, PatternScorer, RetryResult};
pub use orchestrator::{PipelineOrchestrator, RunOptions};
pub use ports::PortAllocator;
pub use quality::QualityGateEvaluator;
pub use reporting::{ReportGenerator, ReportInputs};
pub use resources::{GovernorEvent, ResourceGovernor};
pub use selection::{Selection, TestSelector};
pub use session::{ActiveSession, SessionManager};
pub use simulator::{SimulatorLifecycleManager, SimulatorState};
