//! Domain model types used throughout pushmirror.
//!
//! Everything here lives for exactly one webhook delivery: it is built from
//! the inbound payload, folded into a [`SyncBatch`], submitted as
//! [`DestinationTreeEntry`] values and then dropped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Number of leading characters of a commit id used in commit messages.
pub const SHORT_HASH_LEN: usize = 7;

/// Git file mode used for every submitted tree entry (regular file).
pub const FILE_MODE: &str = "100644";

/// First [`SHORT_HASH_LEN`] characters of a commit id.
pub fn short_hash(id: &str) -> String {
    id.chars().take(SHORT_HASH_LEN).collect()
}

// ---------------------------------------------------------------------------
// Push event
// ---------------------------------------------------------------------------

/// One commit as reported by the push payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    #[serde(default, rename = "added")]
    pub added_paths: Vec<String>,
    #[serde(default, rename = "modified")]
    pub modified_paths: Vec<String>,
    #[serde(default, rename = "removed")]
    pub removed_paths: Vec<String>,
}

impl CommitInfo {
    /// A commit that touches no files at all.
    pub fn is_empty(&self) -> bool {
        self.added_paths.is_empty() && self.modified_paths.is_empty() && self.removed_paths.is_empty()
    }
}

/// A push notification, normalized from the webhook payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushEvent {
    /// Delivery id (`X-GitHub-Delivery`).
    pub id: String,
    /// Name of the account that pushed.
    pub pusher: String,
    pub repository_owner: String,
    pub repository_name: String,
    /// Full ref, e.g. `refs/heads/main`.
    pub git_ref: String,
    /// Commits oldest first.
    pub commits: Vec<CommitInfo>,
}

impl PushEvent {
    /// Branch name when the ref is a branch ref.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// Ref to read content at: the branch name for branch pushes, the raw
    /// ref otherwise.
    pub fn content_ref(&self) -> &str {
        self.branch().unwrap_or(&self.git_ref)
    }

    /// `owner/name` of the pushed repository.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.repository_owner, self.repository_name)
    }
}

// ---------------------------------------------------------------------------
// Extracted changes
// ---------------------------------------------------------------------------

/// Kind of change a commit made to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// One eligible `(path, commit, kind)` produced by the diff extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub path: String,
    pub origin_commit: String,
    pub kind: ChangeKind,
}

impl PathChange {
    pub fn needs_content(&self) -> bool {
        self.kind != ChangeKind::Removed
    }
}

/// A resolved file change. `content == None` is a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub source_path: String,
    pub origin_commit: String,
    pub content: Option<Vec<u8>>,
}

impl FileChange {
    pub fn is_deletion(&self) -> bool {
        self.content.is_none()
    }
}

/// A content lookup that failed and was dropped from the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub path: String,
    pub origin_commit: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Sync batch
// ---------------------------------------------------------------------------

/// Destination path -> change, in first-insertion order, last write wins.
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    entries: Vec<(String, FileChange)>,
    index: HashMap<String, usize>,
    origin_commits: Vec<String>,
    /// Per-file failures collected while building the batch.
    pub failures: Vec<FetchFailure>,
}

impl SyncBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the change for `dest_path`.
    pub fn insert(&mut self, dest_path: String, change: FileChange) {
        match self.index.get(&dest_path) {
            Some(&pos) => self.entries[pos].1 = change,
            None => {
                self.index.insert(dest_path.clone(), self.entries.len());
                self.entries.push((dest_path, change));
            }
        }
    }

    /// Record an origin commit for the message; duplicates are ignored.
    pub fn note_origin(&mut self, short: &str) {
        if !self.origin_commits.iter().any(|c| c == short) {
            self.origin_commits.push(short.to_string());
        }
    }

    pub fn origin_commits(&self) -> &[String] {
        &self.origin_commits
    }

    pub fn get(&self, dest_path: &str) -> Option<&FileChange> {
        self.index.get(dest_path).map(|&pos| &self.entries[pos].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileChange)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `"<prefix> Sync (<h1>, <h2>, ...)"`, or `"Sync (...)"` with no
    /// leading space when the prefix is empty.
    pub fn commit_message(&self, prefix: &str) -> String {
        let hashes = self.origin_commits.join(", ");
        if prefix.is_empty() {
            format!("Sync ({hashes})")
        } else {
            format!("{prefix} Sync ({hashes})")
        }
    }
}

// ---------------------------------------------------------------------------
// Destination tree
// ---------------------------------------------------------------------------

/// One entry submitted to tree creation.
///
/// Exactly one of `content` / `sha` is serialized. A deletion is
/// `sha: Some(None)`, which serializes to an explicit `"sha": null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationTreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<Option<String>>,
}

impl DestinationTreeEntry {
    fn base(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FILE_MODE.to_string(),
            kind: "blob".to_string(),
            content: None,
            sha: None,
        }
    }

    /// Entry carrying inline UTF-8 content.
    pub fn with_content(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::base(path)
        }
    }

    /// Entry pointing at an already uploaded blob.
    pub fn with_blob(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            sha: Some(Some(sha.into())),
            ..Self::base(path)
        }
    }

    /// Entry removing `path` from the base tree.
    pub fn deletion(path: impl Into<String>) -> Self {
        Self {
            sha: Some(None),
            ..Self::base(path)
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self.sha, Some(None))
    }
}

/// Tip of a branch as returned by the "most recent commit" lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTip {
    pub commit_sha: String,
    pub tree_sha: String,
}

/// File returned by a contents lookup.
///
/// Only `kind == "file"` with `encoding == "base64"` carries usable
/// content. Files over 1 MB come back with `encoding: "none"` and an empty
/// body; submodules and symlinks have a different `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileContents {
    pub sha: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(rename = "content", default)]
    pub encoded_content: String,
}

impl FileContents {
    /// A regular file whose body is inline base64.
    pub fn base64_file(
        sha: impl Into<String>,
        path: impl Into<String>,
        encoded_content: impl Into<String>,
    ) -> Self {
        Self {
            sha: sha.into(),
            path: path.into(),
            kind: "file".into(),
            encoding: "base64".into(),
            encoded_content: encoded_content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(commit: &str, content: Option<&str>) -> FileChange {
        FileChange {
            source_path: "src/a.txt".into(),
            origin_commit: commit.into(),
            content: content.map(|c| c.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("abc1234def"), "abc1234");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn test_batch_last_write_wins_keeps_position() {
        let mut batch = SyncBatch::new();
        batch.insert("lib/a.txt".into(), change("aaaaaaa", Some("one")));
        batch.insert("lib/b.txt".into(), change("aaaaaaa", Some("b")));
        batch.insert("lib/a.txt".into(), change("bbbbbbb", Some("two")));

        assert_eq!(batch.len(), 2);
        let paths: Vec<&str> = batch.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["lib/a.txt", "lib/b.txt"]);
        assert_eq!(
            batch.get("lib/a.txt").and_then(|c| c.content.clone()),
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn test_commit_message_dedupes_in_first_seen_order() {
        let mut batch = SyncBatch::new();
        batch.note_origin("abc1234");
        batch.note_origin("def5678");
        batch.note_origin("abc1234");
        assert_eq!(
            batch.commit_message("[mirror]"),
            "[mirror] Sync (abc1234, def5678)"
        );
    }

    #[test]
    fn test_commit_message_without_prefix_has_no_leading_space() {
        let mut batch = SyncBatch::new();
        batch.note_origin("abc1234");
        assert_eq!(batch.commit_message(""), "Sync (abc1234)");
    }

    #[test]
    fn test_tree_entry_serialization() {
        let deletion = serde_json::to_value(DestinationTreeEntry::deletion("a.txt")).unwrap();
        assert_eq!(
            deletion,
            serde_json::json!({"path": "a.txt", "mode": "100644", "type": "blob", "sha": null})
        );

        let content =
            serde_json::to_value(DestinationTreeEntry::with_content("b.txt", "hi")).unwrap();
        assert_eq!(
            content,
            serde_json::json!({"path": "b.txt", "mode": "100644", "type": "blob", "content": "hi"})
        );
        assert!(content.get("sha").is_none());
    }

    #[test]
    fn test_push_event_branch() {
        let event = PushEvent {
            git_ref: "refs/heads/release/1.0".into(),
            ..Default::default()
        };
        assert_eq!(event.branch(), Some("release/1.0"));
        assert_eq!(event.content_ref(), "release/1.0");

        let tag = PushEvent {
            git_ref: "refs/tags/v1".into(),
            ..Default::default()
        };
        assert_eq!(tag.branch(), None);
        assert_eq!(tag.content_ref(), "refs/tags/v1");
    }
}
