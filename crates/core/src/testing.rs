//! In-memory [`SourceControl`] double that records every call.
//!
//! Source files, destination paths and branch tips are seeded up front.
//! Trees and commits created through it get sequential ids (`tree-1`,
//! `commit-1`, ...) and `update_ref` moves the stored tip, so consecutive
//! deliveries chain the way they would against GitHub.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::errors::{CommitStep, GitHubError};
use crate::git::SourceControl;
use crate::models::{BranchTip, DestinationTreeEntry, FileContents};

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    LatestCommit {
        repo: String,
        branch: String,
    },
    GetFileContents {
        repo: String,
        path: String,
        git_ref: String,
    },
    PathExists {
        repo: String,
        path: String,
        git_ref: String,
    },
    CreateBlob {
        repo: String,
        base64_content: String,
    },
    CreateTree {
        repo: String,
        base_tree: String,
        entries: Vec<DestinationTreeEntry>,
    },
    CreateCommit {
        repo: String,
        message: String,
        tree: String,
        parents: Vec<String>,
    },
    UpdateRef {
        repo: String,
        branch: String,
        sha: String,
        force: bool,
    },
}

impl Call {
    pub fn step(&self) -> Option<CommitStep> {
        match self {
            Self::LatestCommit { .. } => Some(CommitStep::LatestCommit),
            Self::PathExists { .. } => Some(CommitStep::PathExists),
            Self::CreateBlob { .. } => Some(CommitStep::CreateBlob),
            Self::CreateTree { .. } => Some(CommitStep::CreateTree),
            Self::CreateCommit { .. } => Some(CommitStep::CreateCommit),
            Self::UpdateRef { .. } => Some(CommitStep::UpdateRef),
            Self::GetFileContents { .. } => None,
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    source_files: HashMap<(String, String), Vec<u8>>,
    fetch_delays: HashMap<String, Duration>,
    destination_paths: HashSet<(String, String)>,
    tips: HashMap<(String, String), BranchTip>,
    failing_step: Option<CommitStep>,
    next_id: usize,
}

/// Recording [`SourceControl`] implementation for tests.
#[derive(Default)]
pub struct MockSourceControl {
    state: Mutex<State>,
}

fn key(owner: &str, repo: &str) -> String {
    format!("{owner}/{repo}")
}

impl MockSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a file readable through `get_file_contents`.
    pub fn put_source_file(&self, owner: &str, repo: &str, path: &str, content: &[u8]) {
        self.lock()
            .source_files
            .insert((key(owner, repo), path.to_string()), content.to_vec());
    }

    /// Delay the content lookup of `path`.
    pub fn delay_fetch(&self, path: &str, delay: Duration) {
        self.lock().fetch_delays.insert(path.to_string(), delay);
    }

    /// Mark `path` as present in the destination tree.
    pub fn put_destination_path(&self, owner: &str, repo: &str, path: &str) {
        self.lock()
            .destination_paths
            .insert((key(owner, repo), path.to_string()));
    }

    /// Seed the tip of a branch.
    pub fn set_branch_tip(&self, owner: &str, repo: &str, branch: &str, commit: &str, tree: &str) {
        self.lock().tips.insert(
            (key(owner, repo), branch.to_string()),
            BranchTip {
                commit_sha: commit.to_string(),
                tree_sha: tree.to_string(),
            },
        );
    }

    /// Current tip of a branch.
    pub fn branch_tip(&self, owner: &str, repo: &str, branch: &str) -> Option<BranchTip> {
        self.lock()
            .tips
            .get(&(key(owner, repo), branch.to_string()))
            .cloned()
    }

    /// Make every call belonging to `step` fail with a 422.
    pub fn fail_at(&self, step: CommitStep) {
        self.lock().failing_step = Some(step);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls belonging to the destination commit sequence.
    pub fn commit_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.step().is_some()).collect()
    }

    /// Entries passed to the most recent `create_tree`.
    pub fn last_tree_entries(&self) -> Option<Vec<DestinationTreeEntry>> {
        self.calls().into_iter().rev().find_map(|c| match c {
            Call::CreateTree { entries, .. } => Some(entries),
            _ => None,
        })
    }

    /// Message passed to the most recent `create_commit`.
    pub fn last_commit_message(&self) -> Option<String> {
        self.calls().into_iter().rev().find_map(|c| match c {
            Call::CreateCommit { message, .. } => Some(message),
            _ => None,
        })
    }

    fn record(&self, call: Call) -> Result<(), GitHubError> {
        let mut state = self.lock();
        let step = call.step();
        state.calls.push(call);
        if step.is_some() && step == state.failing_step {
            return Err(GitHubError::ApiError {
                status: 422,
                body: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }
}

#[async_trait]
impl SourceControl for MockSourceControl {
    async fn latest_commit(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchTip, GitHubError> {
        self.record(Call::LatestCommit {
            repo: key(owner, repo),
            branch: branch.to_string(),
        })?;
        self.branch_tip(owner, repo, branch)
            .ok_or_else(|| GitHubError::NotFound(format!("branch {branch}")))
    }

    async fn get_file_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<FileContents, GitHubError> {
        self.record(Call::GetFileContents {
            repo: key(owner, repo),
            path: path.to_string(),
            git_ref: git_ref.to_string(),
        })?;
        let delay = self.lock().fetch_delays.get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let content = self
            .lock()
            .source_files
            .get(&(key(owner, repo), path.to_string()))
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(path.to_string()))?;
        Ok(FileContents::base64_file(
            format!("blob-of-{path}"),
            path,
            STANDARD.encode(content),
        ))
    }

    async fn path_exists(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<bool, GitHubError> {
        self.record(Call::PathExists {
            repo: key(owner, repo),
            path: path.to_string(),
            git_ref: git_ref.to_string(),
        })?;
        Ok(self
            .lock()
            .destination_paths
            .contains(&(key(owner, repo), path.to_string())))
    }

    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        base64_content: &str,
    ) -> Result<String, GitHubError> {
        self.record(Call::CreateBlob {
            repo: key(owner, repo),
            base64_content: base64_content.to_string(),
        })?;
        Ok(self.next_id("blob"))
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree_sha: &str,
        entries: &[DestinationTreeEntry],
    ) -> Result<String, GitHubError> {
        self.record(Call::CreateTree {
            repo: key(owner, repo),
            base_tree: base_tree_sha.to_string(),
            entries: entries.to_vec(),
        })?;
        Ok(self.next_id("tree"))
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parent_shas: &[String],
    ) -> Result<String, GitHubError> {
        self.record(Call::CreateCommit {
            repo: key(owner, repo),
            message: message.to_string(),
            tree: tree_sha.to_string(),
            parents: parent_shas.to_vec(),
        })?;
        let sha = self.next_id("commit");
        // Remember which tree the commit points at for a later update_ref.
        self.lock().tips.insert(
            (key(owner, repo), format!("object:{sha}")),
            BranchTip {
                commit_sha: sha.clone(),
                tree_sha: tree_sha.to_string(),
            },
        );
        Ok(sha)
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        commit_sha: &str,
        force: bool,
    ) -> Result<(), GitHubError> {
        self.record(Call::UpdateRef {
            repo: key(owner, repo),
            branch: branch.to_string(),
            sha: commit_sha.to_string(),
            force,
        })?;
        let mut state = self.lock();
        let object = state
            .tips
            .get(&(key(owner, repo), format!("object:{commit_sha}")))
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("commit {commit_sha}")))?;
        state.tips.insert((key(owner, repo), branch.to_string()), object);
        Ok(())
    }
}
