//! REST clients for the external providers: GitHub (source) and Vercel (deployments).

pub mod github;
pub mod vercel;

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid GitHub repository URL '{0}'")]
    InvalidRepoUrl(String),

    #[error("neither 'main' nor 'master' branch found in {0}")]
    NoDeployableBranch(String),

    #[error("malformed {provider} response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

/// Shared HTTP client for provider calls.
pub fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    let client = Client::builder()
        .user_agent(concat!("forkship/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Turn a non-2xx response into [`ProviderError::Status`].
async fn check(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}
