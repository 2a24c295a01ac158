//! Version-control port used by selective test selection.

use crate::domain::errors::PipelineResult;
use async_trait::async_trait;

/// How the diff target was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffTarget {
    /// Merge base against a pull-request base ref
    PullRequestBase(String),
    /// Previous revision on a direct push
    PreviousRevision,
    /// Configured default branch
    DefaultBranch(String),
}

impl DiffTarget {
    /// The ref expression handed to the VCS CLI.
    pub fn ref_expr(&self) -> String {
        match self {
            Self::PullRequestBase(base) => base.clone(),
            Self::PreviousRevision => "HEAD~1".to_string(),
            Self::DefaultBranch(branch) => branch.clone(),
        }
    }
}

/// Minimal VCS surface: resolve a diff target and list changed files.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Paths changed between `target` and the working revision,
    /// relative to the repository root.
    async fn changed_files(&self, target: &DiffTarget) -> PipelineResult<Vec<String>>;

    /// Merge base of `ref_name` and HEAD, when the VCS can compute one.
    async fn merge_base(&self, ref_name: &str) -> PipelineResult<Option<String>>;
}
