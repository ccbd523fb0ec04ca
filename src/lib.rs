//! forkship -- deploy GitHub repositories to Vercel and track long-running
//! jobs to completion.
//!
//! The core is the job completion tracker: a poll variant ([`tracker`]) that
//! asks a provider for a job's status until it settles, and a push variant
//! ([`channel`]) that streams self-contained progress snapshots ending in
//! exactly one terminal event.

pub mod api;
pub mod channel;
pub mod config;
pub mod deploy;
pub mod diagnostic;
pub mod providers;
pub mod tracker;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::api::state::AppState;
use crate::config::ForkshipConfig;
use crate::providers::github::GitHubClient;
use crate::tracker::TrackerRegistry;

/// Start the forkship API server and run until Ctrl-C.
pub async fn serve(config: ForkshipConfig) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;

    let http = providers::http_client(config.providers.request_timeout())?;
    let github = GitHubClient::new(
        http.clone(),
        &config.providers.github_api,
        config.providers.github_token.clone(),
    );

    let shutdown = CancellationToken::new();
    let state = AppState {
        config: Arc::new(config),
        registry: TrackerRegistry::new(),
        http,
        repos: Arc::new(github),
        shutdown: shutdown.clone(),
    };
    let app = api::router(state);

    tracing::info!(%addr, "forkship listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested, cancelling in-flight trackers");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
