//! TOML-based configuration system for pushmirror.
//!
//! Sensitive values (API token, webhook secret) are stored as `_env` fields
//! that reference environment variable names. The actual secrets are
//! resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{ConfigError, FieldError};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Webhook listener settings.
    #[serde(default)]
    pub web: WebConfig,

    /// GitHub API and webhook settings.
    pub github: GitHubConfig,

    /// Engine tuning.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Source -> destination mappings, matched in order.
    #[serde(default)]
    pub rules: Vec<SyncRule>,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

/// Webhook listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Port override; replaces the port part of `listen` when set.
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: None,
        }
    }
}

impl WebConfig {
    /// The effective socket address to bind.
    pub fn listen_addr(&self) -> Result<SocketAddr, FieldError> {
        let mut addr: SocketAddr = self
            .listen
            .parse()
            .map_err(|e| FieldError::new("web.listen", format!("invalid address: {e}")))?;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        Ok(addr)
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// GitHub API and webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Environment variable holding the API token.
    pub token_env: String,

    /// Environment variable holding the webhook shared secret.
    pub webhook_secret_env: String,

    /// `User-Agent` sent with every API request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Account the mirror commits as. Pushes by this account are ignored.
    pub bot_account: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,

    /// Resolved webhook secret.
    #[serde(skip)]
    pub webhook_secret: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_user_agent() -> String {
    "pushmirror".into()
}

// ---------------------------------------------------------------------------
// Engine tuning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum content lookups in flight per delivery (default 1).
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

fn default_fetch_concurrency() -> usize {
    1
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Where pushes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub owner: String,
    pub repository: String,
    /// Restrict to pushes on this branch. Any branch when absent.
    #[serde(default)]
    pub branch: Option<String>,
    /// Only paths under this directory are mirrored; it is stripped from
    /// destination paths.
    #[serde(default)]
    pub subdir: Option<String>,
}

/// Where mirrored changes are committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    /// Directory the mirrored paths are placed under. Root when empty.
    #[serde(default)]
    pub subdir: String,
}

impl DestinationSpec {
    /// `owner/repository`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }
}

/// One source -> destination mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRule {
    pub source: SourceSpec,
    pub destination: DestinationSpec,
    #[serde(default)]
    pub commit_prefix: String,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        debug!(rules = config.rules.len(), "configuration parsed successfully");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve the `*_env` fields from environment variables.
    ///
    /// Missing variables only log a warning here; [`validate`](Self::validate)
    /// reports them.
    pub fn resolve_env_vars(&mut self) {
        info!("resolving environment variable references in config");
        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");
        self.github.webhook_secret =
            resolve_optional_env(&self.github.webhook_secret_env, "github.webhook_secret_env");
    }

    /// Check every required field, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if let Err(e) = self.web.listen_addr() {
            problems.push(e);
        }
        if self.github.api_url.trim().is_empty() {
            problems.push(FieldError::new("github.api_url", "must not be empty"));
        }
        if self.github.token.is_none() {
            problems.push(FieldError::new(
                "github.token_env",
                format!("environment variable '{}' is not set", self.github.token_env),
            ));
        }
        if self.github.webhook_secret.is_none() {
            problems.push(FieldError::new(
                "github.webhook_secret_env",
                format!(
                    "environment variable '{}' is not set",
                    self.github.webhook_secret_env
                ),
            ));
        }
        if self.github.bot_account.trim().is_empty() {
            problems.push(FieldError::new("github.bot_account", "must not be empty"));
        }
        if self.sync.fetch_concurrency == 0 {
            problems.push(FieldError::new("sync.fetch_concurrency", "must be > 0"));
        }
        if self.rules.is_empty() {
            problems.push(FieldError::new("rules", "at least one rule is required"));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            validate_rule(i, rule, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }
}

fn validate_rule(i: usize, rule: &SyncRule, problems: &mut Vec<FieldError>) {
    let required = [
        ("source.owner", rule.source.owner.as_str()),
        ("source.repository", rule.source.repository.as_str()),
        ("destination.owner", rule.destination.owner.as_str()),
        ("destination.repository", rule.destination.repository.as_str()),
        ("destination.branch", rule.destination.branch.as_str()),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            problems.push(FieldError::new(
                format!("rules[{i}].{name}"),
                "must not be empty",
            ));
        }
    }
    if matches!(rule.source.branch.as_deref(), Some(b) if b.trim().is_empty()) {
        problems.push(FieldError::new(
            format!("rules[{i}].source.branch"),
            "must not be empty when set",
        ));
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[daemon]
log_level = "debug"

[web]
listen = "127.0.0.1:9000"

[github]
api_url = "https://api.github.com"
token_env = "GITHUB_TOKEN"
webhook_secret_env = "WEBHOOK_SECRET"
user_agent = "mirror-test"
bot_account = "mirror-bot"

[sync]
fetch_concurrency = 4

[[rules]]
commit_prefix = "[mirror]"
[rules.source]
owner = "acme"
repository = "internal"
branch = "main"
subdir = "src/app"
[rules.destination]
owner = "acme-oss"
repository = "public"
branch = "main"
subdir = "lib"

[[rules]]
[rules.source]
owner = "acme"
repository = "docs"
[rules.destination]
owner = "acme-oss"
repository = "docs"
branch = "gh-pages"
"#
    }

    fn resolved() -> AppConfig {
        let mut config = AppConfig::from_toml_str(sample_toml()).unwrap();
        config.github.token = Some("ghp_test".into());
        config.github.webhook_secret = Some("s3cret".into());
        config
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.github.bot_account, "mirror-bot");
        assert_eq!(config.sync.fetch_concurrency, 4);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].source.subdir.as_deref(), Some("src/app"));
        assert_eq!(config.rules[0].destination.subdir, "lib");
        assert_eq!(config.rules[1].source.branch, None);
        assert_eq!(config.rules[1].destination.subdir, "");
        assert_eq!(config.rules[1].commit_prefix, "");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.github.user_agent, "mirror-test");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_accepts_resolved_config() {
        assert!(resolved().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = resolved();
        config.github.bot_account = " ".into();
        config.github.webhook_secret = None;
        config.sync.fetch_concurrency = 0;
        config.rules[1].destination.branch = String::new();

        let err = config.validate().unwrap_err();
        let fields: Vec<&str> = err.fields().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "github.webhook_secret_env",
                "github.bot_account",
                "sync.fetch_concurrency",
                "rules[1].destination.branch",
            ]
        );
    }

    #[test]
    fn test_validate_requires_rules() {
        let mut config = resolved();
        config.rules.clear();
        let err = config.validate().unwrap_err();
        assert!(err.fields().iter().any(|f| f.field == "rules"));
    }

    #[test]
    fn test_listen_addr_port_override() {
        let mut config = resolved();
        assert_eq!(config.web.listen_addr().unwrap().port(), 9000);
        config.web.port = Some(3001);
        assert_eq!(
            config.web.listen_addr().unwrap().to_string(),
            "127.0.0.1:3001"
        );
        config.web.listen = "not an address".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("PUSHMIRROR_TEST_TOKEN", "ghp_abc");
        std::env::set_var("PUSHMIRROR_TEST_SECRET", "hook");

        let toml_str = r#"
[github]
token_env = "PUSHMIRROR_TEST_TOKEN"
webhook_secret_env = "PUSHMIRROR_TEST_SECRET"
bot_account = "bot"
"#;
        let mut config = AppConfig::from_toml_str(toml_str).unwrap();
        config.resolve_env_vars();

        assert_eq!(config.github.token.as_deref(), Some("ghp_abc"));
        assert_eq!(config.github.webhook_secret.as_deref(), Some("hook"));

        std::env::remove_var("PUSHMIRROR_TEST_TOKEN");
        std::env::remove_var("PUSHMIRROR_TEST_SECRET");
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[github]
token_env = "T"
webhook_secret_env = "S"
bot_account = "bot"
"#;
        let config = AppConfig::from_toml_str(minimal).unwrap();
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.web.listen, "0.0.0.0:8080");
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.user_agent, "pushmirror");
        assert_eq!(config.sync.fetch_concurrency, 1);
        assert!(config.rules.is_empty());
    }
}
