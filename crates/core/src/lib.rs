//! pushmirror core library.
//!
//! This crate provides the push-event synchronization engine: configuration,
//! rule matching, change extraction, content fetching, path mapping and the
//! atomic destination commit, plus the GitHub REST client they run against.

pub mod committer;
pub mod config;
pub mod diff;
pub mod errors;
pub mod fetcher;
pub mod git;
pub mod models;
pub mod path_map;
pub mod rules;
pub mod sync_engine;
pub mod testing;

// Re-exports for convenience.
pub use config::AppConfig;
pub use git::{GitHubClient, SourceControl};
pub use rules::RuleMatcher;
pub use sync_engine::SyncEngine;
