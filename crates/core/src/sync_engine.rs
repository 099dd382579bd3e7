//! Per-delivery synchronization engine.
//!
//! The [`SyncEngine`] runs one push delivery through:
//!
//! 1. Filtering: bot-pushed or unmatched events are ignored.
//! 2. Extracting: commits are flattened into ordered path changes.
//! 3. Fetching: content is resolved for added and modified paths.
//! 4. Mapping: source paths are rewritten to destination paths and folded
//!    into a [`SyncBatch`] (later commits overwrite earlier ones).
//! 5. Committing: the batch becomes one commit on the destination branch.
//!
//! Deliveries are independent; the only shared state is the immutable rule
//! set, the API client and a per-destination lock that serializes commits
//! to the same branch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::committer::{self, PushOutcome};
use crate::config::{AppConfig, SyncRule};
use crate::diff;
use crate::fetcher::{self, SourceRef};
use crate::git::SourceControl;
use crate::models::{FetchFailure, FileChange, PushEvent, SyncBatch};
use crate::path_map;
use crate::rules::{MatchMiss, RuleMatcher};

// ---------------------------------------------------------------------------
// Delivery state machine
// ---------------------------------------------------------------------------

/// States a delivery moves through.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Received,
    Validating,
    Filtering,
    Extracting,
    Fetching,
    Mapping,
    Committing,
    Done,
    Ignored,
    Failed,
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Validating => write!(f, "validating"),
            Self::Filtering => write!(f, "filtering"),
            Self::Extracting => write!(f, "extracting"),
            Self::Fetching => write!(f, "fetching"),
            Self::Mapping => write!(f, "mapping"),
            Self::Committing => write!(f, "committing"),
            Self::Done => write!(f, "done"),
            Self::Ignored => write!(f, "ignored"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a delivery was ignored.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    SelfTriggered,
    NoMatchingRule,
}

impl From<MatchMiss> for IgnoreReason {
    fn from(miss: MatchMiss) -> Self {
        match miss {
            MatchMiss::SelfTriggered => Self::SelfTriggered,
            MatchMiss::NoRule => Self::NoMatchingRule,
        }
    }
}

/// Final outcome of one delivery.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// A destination commit was created and the branch moved to it.
    Synced { commit_sha: String },
    /// Nothing eligible survived; no destination objects were created.
    NothingToSync,
    Ignored { reason: IgnoreReason },
    /// A commit-step API call failed. Not retried.
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn state(&self) -> DeliveryState {
        match self {
            Self::Synced { .. } | Self::NothingToSync => DeliveryState::Done,
            Self::Ignored { .. } => DeliveryState::Ignored,
            Self::Failed { .. } => DeliveryState::Failed,
        }
    }
}

/// Everything observable about a finished delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub delivery_id: String,
    pub outcome: DeliveryOutcome,
    /// Destination paths written.
    pub written: Vec<String>,
    /// Destination paths deleted.
    pub deleted: Vec<String>,
    /// Paths dropped because their content lookup failed.
    pub fetch_failures: Vec<FetchFailure>,
    pub finished_at: DateTime<Utc>,
}

impl DeliveryReport {
    fn new(delivery_id: &str, outcome: DeliveryOutcome) -> Self {
        Self {
            delivery_id: delivery_id.to_string(),
            outcome,
            written: Vec::new(),
            deleted: Vec::new(),
            fetch_failures: Vec::new(),
            finished_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    synced: AtomicU64,
    nothing_to_sync: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    fetch_failures: AtomicU64,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct EngineStats {
    pub received: u64,
    pub synced: u64,
    pub nothing_to_sync: u64,
    pub ignored: u64,
    pub failed: u64,
    pub fetch_failures: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

type DestinationKey = (String, String, String);

/// The push-event synchronization engine.
pub struct SyncEngine {
    client: Arc<dyn SourceControl>,
    matcher: RuleMatcher,
    fetch_concurrency: usize,
    destination_locks: Mutex<HashMap<DestinationKey, Arc<tokio::sync::Mutex<()>>>>,
    counters: Counters,
    last_report: Mutex<Option<DeliveryReport>>,
    started_at: DateTime<Utc>,
}

impl SyncEngine {
    /// Create an engine over `client` with the given rules.
    pub fn new(
        client: Arc<dyn SourceControl>,
        matcher: RuleMatcher,
        fetch_concurrency: usize,
    ) -> Self {
        info!(
            rules = matcher.rules().len(),
            fetch_concurrency, "initializing sync engine"
        );
        Self {
            client,
            matcher,
            fetch_concurrency: fetch_concurrency.max(1),
            destination_locks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            last_report: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    /// Build an engine from a validated configuration.
    pub fn from_config(client: Arc<dyn SourceControl>, config: &AppConfig) -> Self {
        let matcher = RuleMatcher::new(config.github.bot_account.clone(), config.rules.clone());
        Self::new(client, matcher, config.sync.fetch_concurrency)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn rule_count(&self) -> usize {
        self.matcher.rules().len()
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            received: c.received.load(Ordering::Relaxed),
            synced: c.synced.load(Ordering::Relaxed),
            nothing_to_sync: c.nothing_to_sync.load(Ordering::Relaxed),
            ignored: c.ignored.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            fetch_failures: c.fetch_failures.load(Ordering::Relaxed),
        }
    }

    /// Report of the most recently finished delivery.
    pub fn last_report(&self) -> Option<DeliveryReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Pure rule lookup; makes no outbound calls.
    pub fn match_event(&self, event: &PushEvent) -> Result<&SyncRule, MatchMiss> {
        self.matcher.match_event(event)
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Run one validated delivery to completion.
    ///
    /// Never returns an error: every failure is folded into the report so
    /// one delivery cannot affect another or the listener.
    #[instrument(skip(self, event), fields(delivery = %event.id, repo = %event.full_name()))]
    pub async fn handle_delivery(&self, event: PushEvent) -> DeliveryReport {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        debug!(state = %DeliveryState::Filtering, "delivery state");

        let report = match self.matcher.match_event(&event) {
            Ok(rule) => {
                info!(
                    commits = event.commits.len(),
                    destination = %rule.destination.full_name(),
                    branch = %rule.destination.branch,
                    "got push event"
                );
                self.sync_matched(&event, rule).await
            }
            Err(miss) => {
                info!(reason = %miss, "ignoring push event");
                DeliveryReport::new(
                    &event.id,
                    DeliveryOutcome::Ignored {
                        reason: miss.into(),
                    },
                )
            }
        };

        self.record(&report);
        report
    }

    async fn sync_matched(&self, event: &PushEvent, rule: &SyncRule) -> DeliveryReport {
        let batch = self.build_batch(event, rule).await;
        let mut report = DeliveryReport::new(&event.id, DeliveryOutcome::NothingToSync);
        report.fetch_failures = batch.failures.clone();

        if batch.is_empty() {
            info!(
                fetch_failures = report.fetch_failures.len(),
                "no eligible changes to sync"
            );
            return report;
        }

        debug!(state = %DeliveryState::Committing, files = batch.len(), "delivery state");
        let lock = self.destination_lock(rule);
        let _guard = lock.lock().await;

        match committer::push(self.client.as_ref(), &batch, rule).await {
            Ok(PushOutcome::Committed(summary)) => {
                report.written = summary.written;
                report.deleted = summary.deleted;
                report.outcome = DeliveryOutcome::Synced {
                    commit_sha: summary.commit_sha,
                };
            }
            Ok(PushOutcome::NothingToCommit { .. }) => {}
            Err(e) => {
                error!(error = %e, "sync failed");
                report.outcome = DeliveryOutcome::Failed {
                    error: e.to_string(),
                };
            }
        }
        report
    }

    /// Extract, fetch and fold the event's changes into a batch.
    ///
    /// Per-file fetch failures end up in `batch.failures`.
    pub async fn build_batch(&self, event: &PushEvent, rule: &SyncRule) -> SyncBatch {
        debug!(state = %DeliveryState::Extracting, "delivery state");
        let extracted = diff::extract_changes(&event.commits, rule);
        debug!(
            changes = extracted.changes.len(),
            pending_fetches = extracted.pending_fetches(),
            commits = ?extracted.origin_commits,
            "extracted changes"
        );

        if extracted.is_empty() {
            return SyncBatch::new();
        }

        debug!(state = %DeliveryState::Fetching, "delivery state");
        let source = SourceRef {
            owner: &event.repository_owner,
            repo: &event.repository_name,
            git_ref: event.content_ref(),
        };
        let results = fetcher::fetch_changes(
            self.client.as_ref(),
            source,
            &extracted.changes,
            self.fetch_concurrency,
        )
        .await;

        debug!(state = %DeliveryState::Mapping, "delivery state");
        fold_into_batch(results, rule)
    }

    fn destination_lock(&self, rule: &SyncRule) -> Arc<tokio::sync::Mutex<()>> {
        let dest = &rule.destination;
        let key = (
            dest.owner.to_ascii_lowercase(),
            dest.repository.to_ascii_lowercase(),
            dest.branch.clone(),
        );
        let mut locks = self
            .destination_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.entry(key).or_default().clone()
    }

    fn record(&self, report: &DeliveryReport) {
        let counter = match report.outcome {
            DeliveryOutcome::Synced { .. } => &self.counters.synced,
            DeliveryOutcome::NothingToSync => &self.counters.nothing_to_sync,
            DeliveryOutcome::Ignored { .. } => &self.counters.ignored,
            DeliveryOutcome::Failed { .. } => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if !report.fetch_failures.is_empty() {
            warn!(
                count = report.fetch_failures.len(),
                "delivery finished with dropped paths"
            );
            self.counters
                .fetch_failures
                .fetch_add(report.fetch_failures.len() as u64, Ordering::Relaxed);
        }
        debug!(state = %report.outcome.state(), "delivery state");
        *self.last_report.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
    }
}

/// Map and fold fetch results, in commit order, into a batch.
///
/// A later result for the same destination path replaces an earlier one.
/// Failures are collected, never folded.
pub fn fold_into_batch(
    results: impl IntoIterator<Item = Result<FileChange, FetchFailure>>,
    rule: &SyncRule,
) -> SyncBatch {
    let mut batch = SyncBatch::new();
    for result in results {
        match result {
            Ok(change) => {
                let dest = path_map::map_path(&change.source_path, rule);
                batch.note_origin(&change.origin_commit);
                batch.insert(dest, change);
            }
            Err(failure) => batch.failures.push(failure),
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSpec, SourceSpec};

    fn rule() -> SyncRule {
        SyncRule {
            source: SourceSpec {
                owner: "acme".into(),
                repository: "internal".into(),
                branch: None,
                subdir: Some("src/app".into()),
            },
            destination: DestinationSpec {
                owner: "oss".into(),
                repository: "public".into(),
                branch: "main".into(),
                subdir: "lib".into(),
            },
            commit_prefix: "[mirror]".into(),
        }
    }

    fn change(path: &str, commit: &str, content: Option<&str>) -> FileChange {
        FileChange {
            source_path: path.into(),
            origin_commit: commit.into(),
            content: content.map(|c| c.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_fold_later_commit_wins() {
        let batch = fold_into_batch(
            vec![
                Ok(change("src/app/p.txt", "aaaaaaa", Some("from c1"))),
                Ok(change("src/app/p.txt", "bbbbbbb", Some("from c2"))),
            ],
            &rule(),
        );
        assert_eq!(batch.len(), 1);
        assert_eq!(
            batch.get("lib/p.txt").unwrap().content.as_deref(),
            Some(&b"from c2"[..])
        );
        assert_eq!(batch.origin_commits(), &["aaaaaaa", "bbbbbbb"]);
    }

    #[test]
    fn test_fold_collects_failures() {
        let batch = fold_into_batch(
            vec![
                Err(FetchFailure {
                    path: "src/app/bad.txt".into(),
                    origin_commit: "aaaaaaa".into(),
                    error: "boom".into(),
                }),
                Ok(change("src/app/good.txt", "bbbbbbb", Some("ok"))),
            ],
            &rule(),
        );
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        // Only commits that contributed a change are named.
        assert_eq!(batch.origin_commits(), &["bbbbbbb"]);
    }

    #[test]
    fn test_delivery_state_display() {
        assert_eq!(DeliveryState::Received.to_string(), "received");
        assert_eq!(DeliveryState::Committing.to_string(), "committing");
        assert_eq!(DeliveryState::Ignored.to_string(), "ignored");
    }

    #[test]
    fn test_outcome_states() {
        assert_eq!(
            DeliveryOutcome::Synced {
                commit_sha: "c".into()
            }
            .state(),
            DeliveryState::Done
        );
        assert_eq!(DeliveryOutcome::NothingToSync.state(), DeliveryState::Done);
        assert_eq!(
            DeliveryOutcome::Failed { error: "e".into() }.state(),
            DeliveryState::Failed
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let v = serde_json::to_value(DeliveryOutcome::Ignored {
            reason: IgnoreReason::SelfTriggered,
        })
        .unwrap();
        assert_eq!(
            v,
            serde_json::json!({"status": "ignored", "reason": "self_triggered"})
        );
    }
}
