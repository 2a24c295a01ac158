//! Helmsman - CI/CD test orchestration for marine instrument apps
//!
//! Helmsman coordinates the ephemeral data-simulator, isolated
//! parallel test sessions with conflict-free ports, flaky-failure
//! classification and retry, changed-file test selection, resource
//! governance, and quality gating into one deterministic pipeline.
//!
//! # Architecture
//!
//! The crate is layered the usual hexagonal way:
//!
//! - **Domain Layer** (`domain`): models, errors, and ports
//! - **Service Layer** (`services`): the pipeline components and orchestrator
//! - **Infrastructure Layer** (`infrastructure`): config, state store, processes, git
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use helmsman::services::{PipelineOrchestrator, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = helmsman::infrastructure::ConfigLoader::load()?;
//!     let mut pipeline = PipelineOrchestrator::new(config, ".", RunOptions::default());
//!     let outcome = pipeline.run().await;
//!     println!("passed: {}", outcome.success);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{PipelineError, PipelineResult};
pub use domain::models::{
    Config, DependencyMapping, PipelineOutcome, PipelineState, PortTriple, QualityResult,
    SessionRecord, SessionSpec, TestHistory,
};
pub use services::{
    DependencyGraphIndexer, FlakyClassifier, PipelineOrchestrator, QualityGateEvaluator,
    ResourceGovernor, RunOptions, SessionManager, SimulatorLifecycleManager, TestSelector,
};
