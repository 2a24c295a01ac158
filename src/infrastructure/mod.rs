//! Infrastructure layer: config loading, persisted state, process and
//! VCS adapters.

pub mod config;
pub mod git;
pub mod process;
pub mod store;

pub use config::{ConfigError, ConfigLoader};
pub use git::GitCli;
pub use process::ManagedProcess;
pub use store::JsonStateStore;
