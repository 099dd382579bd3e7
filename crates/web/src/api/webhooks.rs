//! GitHub push webhook receiver.
//!
//! The signature is checked before anything else is looked at. Rule
//! matching runs inline so unmatched deliveries are answered without any
//! outbound call; matched deliveries run on their own task and the request
//! is answered with `202 Accepted` right away.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pushmirror_core::errors::WebhookError;
use pushmirror_core::models::{CommitInfo, PushEvent};
use pushmirror_core::GitHubClient;

use crate::api::status::AppError;
use crate::AppState;

const HEADER_EVENT: &str = "x-github-event";
const HEADER_DELIVERY: &str = "x-github-delivery";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

// ---------------------------------------------------------------------------
// GitHub webhook types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GitHubPushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    commits: Vec<CommitInfo>,
    repository: GitHubRepoPayload,
    pusher: GitHubPusherPayload,
}

#[derive(Debug, Deserialize)]
struct GitHubRepoPayload {
    name: String,
    owner: GitHubOwnerPayload,
}

/// Push payloads carry both `name` and `login` for the owner.
#[derive(Debug, Deserialize)]
struct GitHubOwnerPayload {
    name: Option<String>,
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubPusherPayload {
    name: String,
}

impl GitHubPushPayload {
    fn into_event(self, delivery_id: String) -> Result<PushEvent, WebhookError> {
        let owner = self
            .repository
            .owner
            .name
            .or(self.repository.owner.login)
            .ok_or_else(|| WebhookError::MalformedPayload("repository owner has no name".into()))?;
        Ok(PushEvent {
            id: delivery_id,
            pusher: self.pusher.name,
            repository_owner: owner,
            repository_name: self.repository.name,
            git_ref: self.git_ref,
            commits: self.commits,
        })
    }
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    status: &'static str,
    delivery_id: String,
    message: String,
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::MissingSignature | WebhookError::InvalidSignature(_) => {
                AppError::Unauthorized(e.to_string())
            }
            WebhookError::MalformedPayload(_) => AppError::BadRequest(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/github", post(github_webhook))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Check `X-Hub-Signature-256` against the raw body.
fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), WebhookError> {
    let signature = header(headers, HEADER_SIGNATURE).ok_or(WebhookError::MissingSignature)?;
    if GitHubClient::verify_webhook_signature(body, signature, secret) {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature("signature mismatch".into()))
    }
}

async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    if let Err(e) = verify_signature(&headers, &body, &state.webhook_secret) {
        warn!(error = %e, "rejecting webhook delivery");
        return Err(e.into());
    }

    let delivery_id = header(&headers, HEADER_DELIVERY)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let event_type = header(&headers, HEADER_EVENT).unwrap_or("unknown");

    let reply = |code: StatusCode, status: &'static str, message: String| {
        Ok((
            code,
            Json(WebhookResponse {
                status,
                delivery_id: delivery_id.clone(),
                message,
            }),
        ))
    };

    match event_type {
        "ping" => return reply(StatusCode::OK, "pong", "pong".into()),
        "push" => {}
        other => {
            info!(event_type = other, "ignoring non-push GitHub webhook event");
            return reply(
                StatusCode::OK,
                "ignored",
                format!("event type '{other}' ignored"),
            );
        }
    }

    let payload: GitHubPushPayload = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    if payload.deleted {
        info!(git_ref = %payload.git_ref, "ignoring branch deletion push");
        return reply(StatusCode::OK, "ignored", "branch deletion".into());
    }

    let event = payload.into_event(delivery_id.clone())?;
    info!(
        delivery = %event.id,
        repo = %event.full_name(),
        git_ref = %event.git_ref,
        commits = event.commits.len(),
        "received GitHub push webhook"
    );

    if let Err(miss) = state.engine.match_event(&event) {
        debug!(reason = %miss, "push does not match any rule");
        return reply(StatusCode::OK, "ignored", miss.to_string());
    }

    let engine = state.engine.clone();
    tokio::spawn(async move {
        engine.handle_delivery(event).await;
    });

    reply(
        StatusCode::ACCEPTED,
        "accepted",
        "push event accepted for sync".into(),
    )
}
