//! Error types for the pushmirror core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// The requested object (file, ref, commit) does not exist.
    #[error("GitHub resource not found: {0}")]
    NotFound(String),

    /// A response body could not be decoded into the expected shape.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

impl GitHubError {
    /// `true` for errors worth retrying later (transport, rate limit, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Webhook intake errors
// ---------------------------------------------------------------------------

/// Reasons an inbound delivery is rejected before any processing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    /// No `X-Hub-Signature-256` header was sent.
    #[error("missing X-Hub-Signature-256 header")]
    MissingSignature,

    /// The signature header did not match the body.
    #[error("webhook signature verification failed: {0}")]
    InvalidSignature(String),

    /// The body is not a well-formed push payload.
    #[error("malformed push payload: {0}")]
    MalformedPayload(String),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Step of the destination commit sequence, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    LatestCommit,
    PathExists,
    CreateBlob,
    CreateTree,
    CreateCommit,
    UpdateRef,
}

impl std::fmt::Display for CommitStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LatestCommit => write!(f, "latest_commit"),
            Self::PathExists => write!(f, "path_exists"),
            Self::CreateBlob => write!(f, "create_blob"),
            Self::CreateTree => write!(f, "create_tree"),
            Self::CreateCommit => write!(f, "create_commit"),
            Self::UpdateRef => write!(f, "update_ref"),
        }
    }
}

/// Errors from the destination commit sequence.
///
/// Any of these aborts the delivery; nothing is retried automatically.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An API call in the commit sequence failed.
    #[error("{step} failed for {repo}: {source}")]
    CommitApi {
        step: CommitStep,
        repo: String,
        #[source]
        source: GitHubError,
    },
}

impl SyncError {
    pub fn commit_api(step: CommitStep, repo: impl Into<String>, source: GitHubError) -> Self {
        Self::CommitApi {
            step,
            repo: repo.into(),
            source,
        }
    }

    /// The step that failed.
    pub fn step(&self) -> CommitStep {
        match self {
            Self::CommitApi { step, .. } => *step,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// One invalid or missing configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub detail: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.detail)
    }
}

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// Every field that failed validation, reported together.
    #[error("invalid configuration ({} problem(s)): {}", .0.len(), join_fields(.0))]
    Invalid(Vec<FieldError>),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConfigError {
    /// Fields reported by an [`ConfigError::Invalid`], empty otherwise.
    pub fn fields(&self) -> &[FieldError] {
        match self {
            Self::Invalid(fields) => fields,
            _ => &[],
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitHubError::RateLimited {
            reset_at: "1700000000".into(),
        };
        assert!(err.to_string().contains("rate limit"));

        let err = ConfigError::Invalid(vec![
            FieldError::new("github.bot_account", "must not be empty"),
            FieldError::new("rules", "at least one rule is required"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 problem(s)"));
        assert!(msg.contains("github.bot_account: must not be empty"));
        assert!(msg.contains("rules: at least one rule is required"));

        let err = SyncError::commit_api(
            CommitStep::CreateTree,
            "acme/public",
            GitHubError::ApiError {
                status: 422,
                body: "BadObjectState".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "create_tree failed for acme/public: GitHub API error (HTTP 422): BadObjectState"
        );
        assert_eq!(err.step(), CommitStep::CreateTree);
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = WebhookError::MissingSignature.into();
        assert!(matches!(core_err, CoreError::Webhook(_)));

        let core_err: CoreError = GitHubError::NotFound("a.txt".into()).into();
        assert!(matches!(core_err, CoreError::GitHub(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(GitHubError::RateLimited {
            reset_at: "x".into()
        }
        .is_transient());
        assert!(GitHubError::ApiError {
            status: 502,
            body: String::new()
        }
        .is_transient());
        assert!(!GitHubError::NotFound("p".into()).is_transient());
    }
}
