//! Flattening a push's commits into an ordered list of path changes.

use std::collections::HashSet;

use tracing::debug;

use crate::config::SyncRule;
use crate::models::{short_hash, ChangeKind, CommitInfo, PathChange};
use crate::path_map;

/// Eligible changes of a push, oldest commit first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedChanges {
    pub changes: Vec<PathChange>,
    /// Short hashes of commits with at least one eligible path, first seen
    /// first.
    pub origin_commits: Vec<String>,
}

impl ExtractedChanges {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn pending_fetches(&self) -> usize {
        self.changes.iter().filter(|c| c.needs_content()).count()
    }
}

/// Walk `commits` (chronological) and collect eligible path changes.
///
/// Within a commit removals come first, then modifications, then
/// additions; a path listed twice under the same kind in one commit is
/// reported once. Order across commits is preserved so a later commit's
/// entry for a path always follows an earlier one.
pub fn extract_changes(commits: &[CommitInfo], rule: &SyncRule) -> ExtractedChanges {
    let mut out = ExtractedChanges::default();

    for commit in commits {
        if commit.is_empty() {
            debug!(commit = %commit.id, "skipping commit without file changes");
            continue;
        }
        let short = short_hash(&commit.id);
        let mut seen: HashSet<(&str, bool)> = HashSet::new();
        let mut contributed = false;

        let kinds = [
            (ChangeKind::Removed, &commit.removed_paths),
            (ChangeKind::Modified, &commit.modified_paths),
            (ChangeKind::Added, &commit.added_paths),
        ];
        for (kind, paths) in kinds {
            for path in paths {
                if !path_map::is_eligible(path, rule) {
                    debug!(path = %path, commit = %short, "path outside source subdirectory");
                    continue;
                }
                if !seen.insert((path.as_str(), kind == ChangeKind::Removed)) {
                    continue;
                }
                out.changes.push(PathChange {
                    path: path.clone(),
                    origin_commit: short.clone(),
                    kind,
                });
                contributed = true;
            }
        }

        if contributed && !out.origin_commits.contains(&short) {
            out.origin_commits.push(short);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSpec, SourceSpec};

    fn rule(subdir: Option<&str>) -> SyncRule {
        SyncRule {
            source: SourceSpec {
                owner: "acme".into(),
                repository: "internal".into(),
                branch: None,
                subdir: subdir.map(Into::into),
            },
            destination: DestinationSpec {
                owner: "acme".into(),
                repository: "public".into(),
                branch: "main".into(),
                subdir: String::new(),
            },
            commit_prefix: String::new(),
        }
    }

    fn commit(id: &str, added: &[&str], modified: &[&str], removed: &[&str]) -> CommitInfo {
        let v = |s: &[&str]| s.iter().map(|p| p.to_string()).collect();
        CommitInfo {
            id: id.into(),
            added_paths: v(added),
            modified_paths: v(modified),
            removed_paths: v(removed),
        }
    }

    #[test]
    fn test_preserves_commit_order() {
        let commits = vec![
            commit("aaaaaaa111", &["a.txt"], &[], &[]),
            commit("bbbbbbb222", &[], &["a.txt"], &["old.txt"]),
        ];
        let out = extract_changes(&commits, &rule(None));
        let summary: Vec<(&str, &str, ChangeKind)> = out
            .changes
            .iter()
            .map(|c| (c.path.as_str(), c.origin_commit.as_str(), c.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a.txt", "aaaaaaa", ChangeKind::Added),
                ("old.txt", "bbbbbbb", ChangeKind::Removed),
                ("a.txt", "bbbbbbb", ChangeKind::Modified),
            ]
        );
        assert_eq!(out.origin_commits, vec!["aaaaaaa", "bbbbbbb"]);
        assert_eq!(out.pending_fetches(), 2);
    }

    #[test]
    fn test_skips_empty_commits() {
        let commits = vec![
            commit("0000000aaa", &[], &[], &[]),
            commit("1111111bbb", &["x"], &[], &[]),
        ];
        let out = extract_changes(&commits, &rule(None));
        assert_eq!(out.changes.len(), 1);
        assert_eq!(out.origin_commits, vec!["1111111"]);
    }

    #[test]
    fn test_applies_subdir_filter() {
        let commits = vec![
            commit("abc1234000", &["src/app/a.js", "docs/b.md"], &[], &[]),
            commit("def5678000", &[], &[], &["docs/c.md"]),
        ];
        let out = extract_changes(&commits, &rule(Some("src/app")));
        assert_eq!(out.changes.len(), 1);
        assert_eq!(out.changes[0].path, "src/app/a.js");
        // The second commit touched nothing eligible.
        assert_eq!(out.origin_commits, vec!["abc1234"]);
    }

    #[test]
    fn test_removals_are_emitted_without_fetch() {
        let commits = vec![commit("abc1234000", &[], &[], &["gone.txt"])];
        let out = extract_changes(&commits, &rule(None));
        assert_eq!(out.changes.len(), 1);
        assert!(!out.changes[0].needs_content());
        assert_eq!(out.pending_fetches(), 0);
    }

    #[test]
    fn test_dedupes_within_a_commit() {
        let commits = vec![commit("abc1234000", &["a"], &["a", "a"], &[])];
        let out = extract_changes(&commits, &rule(None));
        assert_eq!(out.changes.len(), 1);
        assert_eq!(out.changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_same_commit_listed_twice_reports_hash_once() {
        let commits = vec![
            commit("abc1234000", &["a"], &[], &[]),
            commit("abc1234000", &["b"], &[], &[]),
        ];
        let out = extract_changes(&commits, &rule(None));
        assert_eq!(out.origin_commits, vec!["abc1234"]);
        assert_eq!(out.changes.len(), 2);
    }
}
