//! JSON file implementation of the state store port.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::ports::StateStore;

/// Persists each state document as `<state_dir>/<key>.json`.
///
/// Writes go through a temp file + rename so a crash mid-write never
/// leaves a truncated document behind.
pub struct JsonStateStore {
    state_dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn path_for(&self, key: &str) -> PipelineResult<PathBuf> {
        // Keys are logical names, never paths.
        if key.is_empty() || key.contains('/') || key.contains("..") {
            return Err(PipelineError::StateStore(format!(
                "invalid state key: {key:?}"
            )));
        }
        Ok(self.state_dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load_raw(&self, key: &str) -> PipelineResult<Option<serde_json::Value>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let value = serde_json::from_str(&contents)?;
                Ok(Some(value))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_raw(&self, key: &str, value: &serde_json::Value) -> PipelineResult<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.state_dir).await?;

        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key = key, path = %path.display(), "State document saved");
        Ok(())
    }

    async fn remove(&self, key: &str) -> PipelineResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
