//! Turning a [`SyncBatch`] into one commit on the destination branch.
//!
//! The sequence is: resolve the branch tip, drop deletions of paths the
//! destination does not have, create a tree on top of the tip's tree,
//! create a commit whose parent is the tip, then force the branch ref to
//! it. Any API failure aborts the remaining steps. Objects created before
//! the failure are left unreferenced; the next successful push chains onto
//! the branch ref, never onto them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info, instrument};

use crate::config::SyncRule;
use crate::errors::{CommitStep, SyncError};
use crate::git::SourceControl;
use crate::models::{DestinationTreeEntry, SyncBatch};

/// Result of a successful destination commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub commit_sha: String,
    pub tree_sha: String,
    pub parent_sha: String,
    pub message: String,
    /// Destination paths written with new content.
    pub written: Vec<String>,
    /// Destination paths removed.
    pub deleted: Vec<String>,
    /// Deletions dropped because the path was not in the destination.
    pub skipped_deletions: Vec<String>,
}

/// What [`push`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Committed(CommitSummary),
    /// Nothing left to submit; no tree, commit or ref was created.
    NothingToCommit { skipped_deletions: Vec<String> },
}

/// Entries ready for tree creation plus the bookkeeping for the summary.
#[derive(Debug, Default)]
struct PlannedTree {
    entries: Vec<DestinationTreeEntry>,
    written: Vec<String>,
    deleted: Vec<String>,
    skipped_deletions: Vec<String>,
}

/// Commit `batch` to the rule's destination branch.
#[instrument(skip(client, batch, rule), fields(
    destination = %rule.destination.full_name(),
    branch = %rule.destination.branch,
    files = batch.len(),
))]
pub async fn push(
    client: &dyn SourceControl,
    batch: &SyncBatch,
    rule: &SyncRule,
) -> Result<PushOutcome, SyncError> {
    if batch.is_empty() {
        return Ok(PushOutcome::NothingToCommit {
            skipped_deletions: Vec::new(),
        });
    }

    let dest = &rule.destination;
    let repo = dest.full_name();
    let fail = |step: CommitStep| {
        let repo = repo.clone();
        move |e| SyncError::commit_api(step, repo, e)
    };

    let tip = client
        .latest_commit(&dest.owner, &dest.repository, &dest.branch)
        .await
        .map_err(fail(CommitStep::LatestCommit))?;
    debug!(commit = %tip.commit_sha, tree = %tip.tree_sha, "destination tip");

    let plan = plan_tree(client, batch, rule, &tip.commit_sha).await?;
    if plan.entries.is_empty() {
        info!(
            skipped = plan.skipped_deletions.len(),
            "nothing to commit after dropping deletions of absent paths"
        );
        return Ok(PushOutcome::NothingToCommit {
            skipped_deletions: plan.skipped_deletions,
        });
    }

    let tree_sha = client
        .create_tree(&dest.owner, &dest.repository, &tip.tree_sha, &plan.entries)
        .await
        .map_err(fail(CommitStep::CreateTree))?;

    let message = batch.commit_message(&rule.commit_prefix);
    let commit_sha = client
        .create_commit(
            &dest.owner,
            &dest.repository,
            &message,
            &tree_sha,
            std::slice::from_ref(&tip.commit_sha),
        )
        .await
        .map_err(fail(CommitStep::CreateCommit))?;

    client
        .update_ref(&dest.owner, &dest.repository, &dest.branch, &commit_sha, true)
        .await
        .map_err(fail(CommitStep::UpdateRef))?;

    info!(
        commit = %commit_sha,
        written = plan.written.len(),
        deleted = plan.deleted.len(),
        "destination branch updated"
    );

    Ok(PushOutcome::Committed(CommitSummary {
        commit_sha,
        tree_sha,
        parent_sha: tip.commit_sha,
        message,
        written: plan.written,
        deleted: plan.deleted,
        skipped_deletions: plan.skipped_deletions,
    }))
}

/// Content entries first, then deletions that exist at `base_commit`.
async fn plan_tree(
    client: &dyn SourceControl,
    batch: &SyncBatch,
    rule: &SyncRule,
    base_commit: &str,
) -> Result<PlannedTree, SyncError> {
    let dest = &rule.destination;
    let mut plan = PlannedTree::default();
    let mut deletions = Vec::new();

    for (path, change) in batch.iter() {
        let Some(bytes) = change.content.as_deref() else {
            deletions.push(path);
            continue;
        };
        let entry = match std::str::from_utf8(bytes) {
            Ok(text) => DestinationTreeEntry::with_content(path, text),
            Err(_) => {
                let sha = client
                    .create_blob(&dest.owner, &dest.repository, &STANDARD.encode(bytes))
                    .await
                    .map_err(|e| SyncError::commit_api(CommitStep::CreateBlob, dest.full_name(), e))?;
                debug!(path, blob = %sha, "uploaded binary content");
                DestinationTreeEntry::with_blob(path, sha)
            }
        };
        plan.entries.push(entry);
        plan.written.push(path.to_string());
    }

    for path in deletions {
        let exists = client
            .path_exists(&dest.owner, &dest.repository, path, base_commit)
            .await
            .map_err(|e| SyncError::commit_api(CommitStep::PathExists, dest.full_name(), e))?;
        if exists {
            plan.entries.push(DestinationTreeEntry::deletion(path));
            plan.deleted.push(path.to_string());
        } else {
            debug!(path, "dropping deletion of path absent from destination");
            plan.skipped_deletions.push(path.to_string());
        }
    }

    Ok(plan)
}
