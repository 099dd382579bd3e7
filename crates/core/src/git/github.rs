//! GitHub REST API client.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};

use super::SourceControl;
use crate::errors::GitHubError;
use crate::models::{BranchTip, DestinationTreeEntry, FileContents};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Deserialize)]
struct ListedCommit {
    sha: String,
    commit: ListedCommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct ListedCommitDetail {
    tree: ShaOnly,
}

#[derive(Debug, Clone, Deserialize)]
struct ShaOnly {
    sha: String,
}

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: Url,
    token: String,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        user_agent: &str,
    ) -> Result<Self, GitHubError> {
        let raw = api_url.into();
        let api_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| GitHubError::ParseError(format!("invalid API URL {raw}: {e}")))?;
        if api_url.cannot_be_a_base() {
            return Err(GitHubError::ParseError(format!("invalid API URL {raw}")));
        }
        let token = token.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| GitHubError::ParseError(format!("invalid user agent: {e}")))?,
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    /// Verify a GitHub webhook signature (`sha256=<hex>` HMAC of the body).
    pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
        let hex_sig = match signature.strip_prefix("sha256=") {
            Some(s) => s,
            None => {
                warn!("webhook signature missing sha256= prefix");
                return false;
            }
        };
        let expected_bytes = match hex::decode(hex_sig) {
            Ok(b) => b,
            Err(_) => {
                warn!("webhook signature is not valid hex");
                return false;
            }
        };
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                warn!("failed to create HMAC");
                return false;
            }
        };
        mac.update(payload);
        mac.verify_slice(&expected_bytes).is_ok()
    }

    /// Compute the `sha256=<hex>` signature GitHub would send for `payload`.
    pub fn sign_webhook_payload(payload: &[u8], secret: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(payload);
        Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }

    /// `{api_url}/repos/{owner}/{repo}/{segments...}`.
    ///
    /// Each segment is split on `/` and percent-encoded, so file and branch
    /// names containing `#`, `?`, `%` or spaces address the right resource.
    fn repo_url(&self, owner: &str, repo: &str, segments: &[&str]) -> Result<Url, GitHubError> {
        let mut url = self.api_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                GitHubError::ParseError(format!("API URL {} cannot carry a path", self.api_url))
            })?;
            path.pop_if_empty().extend(["repos", owner, repo]);
            for segment in segments {
                path.extend(segment.split('/'));
            }
        }
        Ok(url)
    }

    async fn check_response(
        &self,
        resp: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, GitHubError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let remaining = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let reset = resp
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        if status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN && remaining.as_deref() == Some("0"))
        {
            return Err(GitHubError::RateLimited { reset_at: reset });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GitHubError::AuthenticationFailed(format!("HTTP {}", status)));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GitHubError::NotFound(what.to_string()));
        }
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP {}", status));
        Err(GitHubError::ApiError {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Deserialize)]
struct ShaResponse {
    sha: String,
}

#[async_trait]
impl SourceControl for GitHubClient {
    #[instrument(skip(self))]
    async fn latest_commit(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchTip, GitHubError> {
        let url = self.repo_url(owner, repo, &["commits"])?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("sha", branch), ("per_page", "1")])
            .send()
            .await?;
        let resp = self.check_response(resp, branch).await?;
        let commits: Vec<ListedCommit> = resp.json().await?;
        let latest = commits
            .into_iter()
            .next()
            .ok_or_else(|| GitHubError::NotFound(format!("no commits on {branch}")))?;
        debug!(commit = %latest.sha, tree = %latest.commit.tree.sha, "resolved branch tip");
        Ok(BranchTip {
            commit_sha: latest.sha,
            tree_sha: latest.commit.tree.sha,
        })
    }

    #[instrument(skip(self))]
    async fn get_file_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<FileContents, GitHubError> {
        let url = self.repo_url(owner, repo, &["contents", path])?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("ref", git_ref)])
            .send()
            .await?;
        let resp = self.check_response(resp, path).await?;
        // Directories come back as arrays; only files are usable here.
        let value: serde_json::Value = resp.json().await?;
        let contents: FileContents = serde_json::from_value(value)
            .map_err(|e| GitHubError::ParseError(format!("{path}: {e}")))?;
        debug!(path = %contents.path, sha = %contents.sha, "fetched file contents");
        Ok(contents)
    }

    #[instrument(skip(self))]
    async fn path_exists(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<bool, GitHubError> {
        let url = self.repo_url(owner, repo, &["contents", path])?;
        let resp = self
            .http
            .head(url)
            .bearer_auth(&self.token)
            .query(&[("ref", git_ref)])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        self.check_response(resp, path).await?;
        Ok(true)
    }

    #[instrument(skip(self, base64_content))]
    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        base64_content: &str,
    ) -> Result<String, GitHubError> {
        let url = self.repo_url(owner, repo, &["git", "blobs"])?;
        let payload = serde_json::json!({ "content": base64_content, "encoding": "base64" });
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = self.check_response(resp, "blob").await?;
        let blob: ShaResponse = resp.json().await?;
        debug!(sha = %blob.sha, "created blob");
        Ok(blob.sha)
    }

    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree_sha: &str,
        entries: &[DestinationTreeEntry],
    ) -> Result<String, GitHubError> {
        let url = self.repo_url(owner, repo, &["git", "trees"])?;
        let payload = serde_json::json!({ "base_tree": base_tree_sha, "tree": entries });
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = self.check_response(resp, "tree").await?;
        let tree: ShaResponse = resp.json().await?;
        debug!(sha = %tree.sha, "created tree");
        Ok(tree.sha)
    }

    #[instrument(skip(self, message))]
    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parent_shas: &[String],
    ) -> Result<String, GitHubError> {
        let url = self.repo_url(owner, repo, &["git", "commits"])?;
        let payload =
            serde_json::json!({ "message": message, "tree": tree_sha, "parents": parent_shas });
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = self.check_response(resp, "commit").await?;
        let commit: ShaResponse = resp.json().await?;
        info!(sha = %commit.sha, "created commit");
        Ok(commit.sha)
    }

    #[instrument(skip(self))]
    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        commit_sha: &str,
        force: bool,
    ) -> Result<(), GitHubError> {
        let url = self.repo_url(owner, repo, &["git", "refs", "heads", branch])?;
        let payload = serde_json::json!({ "sha": commit_sha, "force": force });
        let resp = self
            .http
            .patch(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        self.check_response(resp, branch).await?;
        info!(branch, commit_sha, "updated ref");
        Ok(())
    }
}
