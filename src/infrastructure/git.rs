//! Git CLI adapter for the VCS port.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::ports::{DiffTarget, Vcs};

/// Runs the `git` CLI in a repository root.
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> PipelineResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| PipelineError::Vcs(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn changed_files(&self, target: &DiffTarget) -> PipelineResult<Vec<String>> {
        let ref_expr = target.ref_expr();
        let stdout = self
            .run(&["diff", "--name-only", &ref_expr, "HEAD"])
            .await?;

        let files: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        debug!(target = ?target, count = files.len(), "Changed files resolved");
        Ok(files)
    }

    async fn merge_base(&self, ref_name: &str) -> PipelineResult<Option<String>> {
        match self.run(&["merge-base", ref_name, "HEAD"]).await {
            Ok(stdout) => {
                let sha = stdout.trim().to_string();
                Ok(if sha.is_empty() { None } else { Some(sha) })
            }
            // An unknown ref is not fatal; the caller falls back.
            Err(PipelineError::Vcs(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
