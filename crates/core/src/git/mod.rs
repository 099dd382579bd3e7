//! Source-control API contract and its GitHub implementation.

pub mod github;

use async_trait::async_trait;

use crate::errors::GitHubError;
use crate::models::{BranchTip, DestinationTreeEntry, FileContents};

pub use github::GitHubClient;

/// The remote operations the engine relies on.
///
/// Implementations must be safe to share across concurrent deliveries.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Most recent commit on `branch` and its tree.
    async fn latest_commit(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchTip, GitHubError>;

    /// File at `path` as of `git_ref`. Missing files are
    /// [`GitHubError::NotFound`].
    async fn get_file_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<FileContents, GitHubError>;

    /// Whether `path` exists in the tree at `git_ref`.
    async fn path_exists(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<bool, GitHubError>;

    /// Upload raw bytes (already base64 encoded) as a blob, returning its sha.
    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        base64_content: &str,
    ) -> Result<String, GitHubError>;

    /// New tree from `base_tree_sha` plus `entries`; returns the tree sha.
    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree_sha: &str,
        entries: &[DestinationTreeEntry],
    ) -> Result<String, GitHubError>;

    /// New commit object; returns its sha.
    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parent_shas: &[String],
    ) -> Result<String, GitHubError>;

    /// Point `heads/<branch>` at `commit_sha`.
    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        commit_sha: &str,
        force: bool,
    ) -> Result<(), GitHubError>;
}
