//! pushmirror daemon entry point.
//!
//! Loads configuration, builds the GitHub client and sync engine, serves the
//! webhook listener, and stops it on SIGINT/SIGTERM.

mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pushmirror_core::config::AppConfig;
use pushmirror_core::sync_engine::SyncEngine;
use pushmirror_core::GitHubClient;
use pushmirror_web::WebServer;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// pushmirror synchronization daemon.
#[derive(Parser, Debug)]
#[command(
    name = "pushmirror-daemon",
    version,
    about = "Mirror pushed changes from GitHub source repositories into destination repositories"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::load_and_resolve(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    // Initialize tracing
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    let listen_addr = config.web.listen_addr().map_err(|e| anyhow!("{e}"))?;

    // Startup banner
    info!("========================================");
    info!("  pushmirror daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("GitHub API    : {}", config.github.api_url);
    info!("Bot account   : {}", config.github.bot_account);
    info!("Rules         : {}", config.rules.len());
    for rule in &config.rules {
        info!(
            "  {}/{} -> {}@{}",
            rule.source.owner,
            rule.source.repository,
            rule.destination.full_name(),
            rule.destination.branch
        );
    }
    info!("Web listen    : {}", listen_addr);
    info!("Log level     : {}", log_level);
    info!("========================================");

    // Both are present after validation.
    let token = config.github.token.clone().unwrap_or_default();
    let webhook_secret = config.github.webhook_secret.clone().unwrap_or_default();

    let client = GitHubClient::new(&config.github.api_url, token, &config.github.user_agent)
        .context("failed to create GitHub client")?;
    let engine = Arc::new(SyncEngine::from_config(Arc::new(client), &config));
    info!("Sync engine initialized");

    let web_server = WebServer::new(engine, webhook_secret);
    let mut web_handle = tokio::spawn(async move { web_server.start(listen_addr).await });

    tokio::select! {
        _ = signals::wait_for_shutdown() => {
            info!("Shutdown signal received, stopping...");
            web_handle.abort();
        }
        result = &mut web_handle => {
            match result {
                Ok(Ok(())) => info!("web server exited"),
                Ok(Err(e)) => {
                    error!("Web server error: {:#}", e);
                    return Err(e);
                }
                Err(e) => return Err(anyhow!("web server task failed: {e}")),
            }
        }
    }

    info!("pushmirror daemon stopped.");
    Ok(())
}
