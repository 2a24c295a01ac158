//! Ports: trait seams between the domain and infrastructure.

pub mod extractor;
pub mod scoring;
pub mod state_store;
pub mod vcs;

pub use extractor::DependencyExtractor;
pub use scoring::{FlakyScorer, FlakyVerdict};
pub use state_store::{keys, StateStore, StateStoreExt};
pub use vcs::{DiffTarget, Vcs};
