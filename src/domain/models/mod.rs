//! Domain models for the Helmsman pipeline.

pub mod config;
pub mod dependency;
pub mod history;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod session;

pub use config::{
    Config, CoverageThresholds, FeatureFlags, FlakyConfig, LoggingConfig, PortConfig,
    QualityConfig, ResourceConfig, SelectionConfig, SessionConfig, SimulatorConfig,
};
pub use dependency::DependencyMapping;
pub use history::{TestHistory, TestHistoryEntry};
pub use metrics::{ResourceSample, Violation, ViolationKind, ViolationSeverity};
pub use pipeline::{PhaseKind, PhaseRecord, PhaseStatus, PipelineOutcome, PipelineState};
pub use quality::{CoverageMetrics, CoverageReport, QualityResult, QualityViolation};
pub use session::{PortTriple, SessionOutcome, SessionRecord, SessionSpec};
