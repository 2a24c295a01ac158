//! CLI command implementations.

pub mod flaky;
pub mod pipeline;
pub mod resources;
pub mod select;
pub mod simulator;
