//! Source path eligibility and source -> destination path rewriting.
//!
//! Paths are compared by whole directory components: a source subdirectory
//! of `src/app` covers `src/app/x.js` and `src/app/lib/y.js` but not
//! `src/application/z.js`.

use crate::config::SyncRule;

/// Canonical form: forward slashes, no empty or `.` segments, no leading
/// or trailing slash.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory part of a normalized path (`""` for top-level files).
fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// `true` when `dir` equals `root` or sits beneath it.
fn dir_within(dir: &str, root: &str) -> bool {
    root.is_empty()
        || dir == root
        || (dir.len() > root.len() && dir.starts_with(root) && dir.as_bytes()[root.len()] == b'/')
}

/// Whether `source_path` falls inside the rule's source subdirectory.
///
/// The file's containing directory must equal or be nested under the
/// subdirectory. Without a subdirectory every path is eligible.
pub fn is_eligible(source_path: &str, rule: &SyncRule) -> bool {
    match rule.source.subdir.as_deref() {
        None => true,
        Some(subdir) => {
            let path = normalize(source_path);
            dir_within(parent_dir(&path), &normalize(subdir))
        }
    }
}

/// Rewrite a source path into its destination path.
pub fn map_path(source_path: &str, rule: &SyncRule) -> String {
    let path = normalize(source_path);
    let remainder = match rule.source.subdir.as_deref().map(normalize) {
        Some(subdir) if !subdir.is_empty() => {
            if path.starts_with(&subdir) && path.as_bytes().get(subdir.len()) == Some(&b'/') {
                path[subdir.len() + 1..].to_string()
            } else {
                path
            }
        }
        _ => path,
    };
    normalize(&format!("{}/{}", rule.destination.subdir, remainder))
}
