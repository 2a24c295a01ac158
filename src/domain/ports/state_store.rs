//! State repository port.
//!
//! All persisted pipeline state (port allocations, test history,
//! dependency mapping, pipeline results) goes through this interface
//! instead of scattered file I/O.

use crate::domain::errors::PipelineResult;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Logical names of the persisted state documents.
pub mod keys {
    pub const PORT_ALLOCATION: &str = "port-allocation";
    pub const TEST_HISTORY: &str = "test-history";
    pub const DEPENDENCY_MAPPING: &str = "dependency-mapping";
    pub const PIPELINE_RESULTS: &str = "pipeline-results";
    pub const SIMULATOR_STATUS: &str = "simulator-status";
}

/// Load/save repository for JSON state documents keyed by logical name.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the raw JSON document for `key`, or `None` if absent.
    async fn load_raw(&self, key: &str) -> PipelineResult<Option<serde_json::Value>>;

    /// Save the raw JSON document for `key`.
    async fn save_raw(&self, key: &str, value: &serde_json::Value) -> PipelineResult<()>;

    /// Remove the document for `key`, if present.
    async fn remove(&self, key: &str) -> PipelineResult<()>;
}

/// Typed convenience wrappers over the raw document API.
#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn load<T: DeserializeOwned>(&self, key: &str) -> PipelineResult<Option<T>> {
        match self.load_raw(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize + Sync>(&self, key: &str, value: &T) -> PipelineResult<()> {
        self.save_raw(key, &serde_json::to_value(value)?).await
    }
}

#[async_trait]
impl<S: StateStore + ?Sized> StateStoreExt for S {}
