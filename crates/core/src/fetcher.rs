//! Resolving current content for added and modified paths.
//!
//! Lookups run through a bounded, order-preserving stream: at most
//! `concurrency` requests are in flight and results come back in input
//! order regardless of completion order. A failed lookup only drops its
//! own path.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::errors::GitHubError;
use crate::git::SourceControl;
use crate::models::{FetchFailure, FileChange, FileContents, PathChange};

/// Where to read source content from.
#[derive(Debug, Clone, Copy)]
pub struct SourceRef<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub git_ref: &'a str,
}

/// Decode the base64 body of a contents response. GitHub wraps it at 60
/// columns, so whitespace is stripped first.
///
/// Anything but an inline base64 file is rejected rather than read as an
/// empty file.
pub fn decode_contents(contents: &FileContents) -> Result<Vec<u8>, GitHubError> {
    if contents.kind != "file" {
        return Err(GitHubError::ParseError(format!(
            "{}: not a regular file (type {})",
            contents.path, contents.kind
        )));
    }
    if contents.encoding != "base64" {
        return Err(GitHubError::ParseError(format!(
            "{}: content not inline (encoding '{}'), file too large for the contents API",
            contents.path, contents.encoding
        )));
    }
    let compact: String = contents
        .encoded_content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| GitHubError::ParseError(format!("{}: invalid base64 content: {e}", contents.path)))
}

/// Resolve one change. Removals resolve immediately to a deletion.
async fn resolve(
    client: &dyn SourceControl,
    source: SourceRef<'_>,
    change: &PathChange,
) -> Result<FileChange, FetchFailure> {
    if !change.needs_content() {
        return Ok(FileChange {
            source_path: change.path.clone(),
            origin_commit: change.origin_commit.clone(),
            content: None,
        });
    }

    let fetched = client
        .get_file_contents(source.owner, source.repo, &change.path, source.git_ref)
        .await
        .and_then(|contents| decode_contents(&contents));

    match fetched {
        Ok(bytes) => {
            debug!(path = %change.path, bytes = bytes.len(), "resolved content");
            Ok(FileChange {
                source_path: change.path.clone(),
                origin_commit: change.origin_commit.clone(),
                content: Some(bytes),
            })
        }
        Err(e) => {
            warn!(
                path = %change.path,
                commit = %change.origin_commit,
                transient = e.is_transient(),
                error = %e,
                "failed to fetch content, dropping path"
            );
            Err(FetchFailure {
                path: change.path.clone(),
                origin_commit: change.origin_commit.clone(),
                error: e.to_string(),
            })
        }
    }
}

/// Resolve every change, returning one result per input in input order.
pub async fn fetch_changes(
    client: &dyn SourceControl,
    source: SourceRef<'_>,
    changes: &[PathChange],
    concurrency: usize,
) -> Vec<Result<FileChange, FetchFailure>> {
    // Futures are lazy: nothing runs until `buffered` polls them.
    let lookups: Vec<_> = changes
        .iter()
        .map(|change| resolve(client, source, change))
        .collect();
    stream::iter(lookups)
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeKind;
    use crate::testing::MockSourceControl;

    fn change(path: &str, commit: &str, kind: ChangeKind) -> PathChange {
        PathChange {
            path: path.into(),
            origin_commit: commit.into(),
            kind,
        }
    }

    const SOURCE: SourceRef<'static> = SourceRef {
        owner: "acme",
        repo: "internal",
        git_ref: "main",
    };

    #[test]
    fn test_decode_wrapped_base64() {
        let contents = FileContents::base64_file("s", "a.txt", "aGVs\nbG8g\nd29y\nbGQ=\n");
        assert_eq!(decode_contents(&contents).unwrap(), b"hello world");
    }

    #[test]
    fn test_decode_empty_file() {
        let contents = FileContents::base64_file("s", "empty.txt", "");
        assert_eq!(decode_contents(&contents).unwrap(), b"");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let contents = FileContents::base64_file("s", "a.txt", "!!!");
        assert!(matches!(
            decode_contents(&contents),
            Err(GitHubError::ParseError(_))
        ));
    }

    #[test]
    fn test_decode_rejects_large_file_without_inline_content() {
        let body = r#"{"type":"file","encoding":"none","size":2000000,
                       "path":"big.bin","content":"","sha":"abc"}"#;
        let contents: FileContents = serde_json::from_str(body).unwrap();
        let err = decode_contents(&contents).unwrap_err();
        assert!(matches!(err, GitHubError::ParseError(_)));
        assert!(err.to_string().contains("big.bin"));
    }

    #[test]
    fn test_decode_rejects_submodule() {
        let body = r#"{"type":"submodule","path":"vendor/lib","sha":"abc",
                       "submodule_git_url":"https://example.com/lib.git"}"#;
        let contents: FileContents = serde_json::from_str(body).unwrap();
        assert!(matches!(
            decode_contents(&contents),
            Err(GitHubError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_file() {
        let mock = MockSourceControl::new();
        mock.put_source_file("acme", "internal", "good.txt", b"ok");
        let changes = vec![
            change("missing.txt", "aaaaaaa", ChangeKind::Added),
            change("good.txt", "aaaaaaa", ChangeKind::Modified),
        ];

        let results = fetch_changes(&mock, SOURCE, &changes, 1).await;
        assert_eq!(results.len(), 2);
        let failure = results[0].as_ref().unwrap_err();
        assert_eq!(failure.path, "missing.txt");
        assert!(failure.error.contains("not found"));
        assert_eq!(
            results[1].as_ref().unwrap().content.as_deref(),
            Some(&b"ok"[..])
        );
    }

    #[tokio::test]
    async fn test_removals_do_not_call_the_api() {
        let mock = MockSourceControl::new();
        let changes = vec![change("gone.txt", "aaaaaaa", ChangeKind::Removed)];
        let results = fetch_changes(&mock, SOURCE, &changes, 4).await;
        assert!(results[0].as_ref().unwrap().is_deletion());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_input_order_with_concurrency() {
        let mock = MockSourceControl::new();
        for name in ["a", "b", "c", "d"] {
            mock.put_source_file("acme", "internal", name, name.as_bytes());
        }
        // "a" finishes last, after "b" and "c" in the same window.
        mock.delay_fetch("a", std::time::Duration::from_millis(30));
        let changes: Vec<PathChange> = ["a", "b", "c", "d"]
            .iter()
            .map(|p| change(p, "aaaaaaa", ChangeKind::Added))
            .collect();

        let results = fetch_changes(&mock, SOURCE, &changes, 3).await;
        let paths: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().source_path)
            .collect();
        assert_eq!(paths, vec!["a", "b", "c", "d"]);
    }
}
