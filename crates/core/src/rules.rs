//! Matching push events to configured sync rules.

use tracing::debug;

use crate::config::SyncRule;
use crate::models::PushEvent;

/// Why a delivery was not matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchMiss {
    /// Pushed by the mirror's own account.
    SelfTriggered,
    /// No rule covers this repository and branch.
    NoRule,
}

impl std::fmt::Display for MatchMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfTriggered => write!(f, "pushed by the sync bot"),
            Self::NoRule => write!(f, "no matching rule"),
        }
    }
}

/// Immutable rule list plus the bot identity to exclude.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    bot_account: String,
    rules: Vec<SyncRule>,
}

impl RuleMatcher {
    pub fn new(bot_account: impl Into<String>, rules: Vec<SyncRule>) -> Self {
        Self {
            bot_account: bot_account.into(),
            rules,
        }
    }

    pub fn rules(&self) -> &[SyncRule] {
        &self.rules
    }

    /// First rule covering `event`, unless the bot itself pushed it.
    pub fn match_event(&self, event: &PushEvent) -> Result<&SyncRule, MatchMiss> {
        if event.pusher.eq_ignore_ascii_case(&self.bot_account) {
            debug!(pusher = %event.pusher, "ignoring push by sync bot");
            return Err(MatchMiss::SelfTriggered);
        }
        self.rules
            .iter()
            .find(|rule| rule_covers(rule, event))
            .ok_or(MatchMiss::NoRule)
    }
}

fn rule_covers(rule: &SyncRule, event: &PushEvent) -> bool {
    if !rule.source.owner.eq_ignore_ascii_case(&event.repository_owner)
        || !rule
            .source
            .repository
            .eq_ignore_ascii_case(&event.repository_name)
    {
        return false;
    }
    match rule.source.branch.as_deref() {
        None => true,
        Some(branch) => event
            .branch()
            .is_some_and(|pushed| pushed.eq_ignore_ascii_case(branch)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSpec, SourceSpec};

    fn rule(owner: &str, repo: &str, branch: Option<&str>, dest: &str) -> SyncRule {
        SyncRule {
            source: SourceSpec {
                owner: owner.into(),
                repository: repo.into(),
                branch: branch.map(Into::into),
                subdir: None,
            },
            destination: DestinationSpec {
                owner: "oss".into(),
                repository: dest.into(),
                branch: "main".into(),
                subdir: String::new(),
            },
            commit_prefix: String::new(),
        }
    }

    fn event(pusher: &str, owner: &str, repo: &str, git_ref: &str) -> PushEvent {
        PushEvent {
            id: "d1".into(),
            pusher: pusher.into(),
            repository_owner: owner.into(),
            repository_name: repo.into(),
            git_ref: git_ref.into(),
            commits: Vec::new(),
        }
    }

    #[test]
    fn test_bot_pushes_are_ignored_case_insensitively() {
        let matcher = RuleMatcher::new("Mirror-Bot", vec![rule("acme", "app", None, "a")]);
        let ev = event("mirror-bot", "acme", "app", "refs/heads/main");
        assert_eq!(matcher.match_event(&ev), Err(MatchMiss::SelfTriggered));
    }

    #[test]
    fn test_matches_owner_and_repo_case_insensitively() {
        let matcher = RuleMatcher::new("bot", vec![rule("Acme", "App", None, "a")]);
        let ev = event("alice", "acme", "APP", "refs/heads/feature");
        assert_eq!(matcher.match_event(&ev).unwrap().destination.repository, "a");
    }

    #[test]
    fn test_branch_restriction() {
        let matcher = RuleMatcher::new(
            "bot",
            vec![
                rule("acme", "app", Some("main"), "main-mirror"),
                rule("acme", "app", Some("Release"), "release-mirror"),
            ],
        );
        let on_release = event("alice", "acme", "app", "refs/heads/release");
        assert_eq!(
            matcher.match_event(&on_release).unwrap().destination.repository,
            "release-mirror"
        );
        let on_other = event("alice", "acme", "app", "refs/heads/dev");
        assert_eq!(matcher.match_event(&on_other), Err(MatchMiss::NoRule));
        let tag = event("alice", "acme", "app", "refs/tags/main");
        assert_eq!(matcher.match_event(&tag), Err(MatchMiss::NoRule));
    }

    #[test]
    fn test_first_match_wins() {
        let matcher = RuleMatcher::new(
            "bot",
            vec![rule("acme", "app", None, "first"), rule("acme", "app", None, "second")],
        );
        let ev = event("alice", "acme", "app", "refs/heads/main");
        assert_eq!(matcher.match_event(&ev).unwrap().destination.repository, "first");
    }

    #[test]
    fn test_unknown_repository() {
        let matcher = RuleMatcher::new("bot", vec![rule("acme", "app", None, "a")]);
        let ev = event("alice", "acme", "other", "refs/heads/main");
        assert_eq!(matcher.match_event(&ev), Err(MatchMiss::NoRule));
    }
}
