use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::ForkshipConfig;
use crate::providers::github::{GitHubClient, RepoSource};
use crate::providers::vercel::VercelClient;
use crate::tracker::TrackerRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ForkshipConfig>,
    pub registry: TrackerRegistry,
    pub http: Client,
    pub repos: Arc<dyn RepoSource>,
    /// Cancelled on server shutdown; in-flight trackers stop with it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn vercel(&self, token: &str) -> VercelClient {
        VercelClient::new(self.http.clone(), &self.config.providers.vercel_api, token)
    }

    pub fn github(&self, token: String) -> GitHubClient {
        GitHubClient::new(
            self.http.clone(),
            &self.config.providers.github_api,
            Some(token),
        )
    }
}
