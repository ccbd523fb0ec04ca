//! Deploy a GitHub repository to Vercel and poll the deployment to completion.

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::providers::github::{RepoRef, RepoSource};
use crate::providers::vercel::{CreateDeployment, Deployer};
use crate::providers::ProviderError;
use crate::tracker::{JobId, TrackError, TrackerConfig, TrackerOutcome, TrackerRegistry};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Track(#[from] TrackError),
}

/// Result of a deployment, shaped for API clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

impl DeployReport {
    pub fn from_outcome(deployment_id: &JobId, outcome: &TrackerOutcome) -> Self {
        let (success, url, error) = match outcome {
            TrackerOutcome::Success { payload } => {
                let url = payload
                    .as_ref()
                    .and_then(|p| p.get("url"))
                    .and_then(|u| u.as_str())
                    .map(str::to_string);
                (true, url, None)
            }
            TrackerOutcome::Failure { status, reason } => {
                let error = match reason.as_ref().and_then(failure_detail) {
                    Some(detail) => {
                        format!("Deployment failed with status: {} ({})", status, detail)
                    }
                    None => format!("Deployment failed with status: {}", status),
                };
                (false, None, Some(error))
            }
            TrackerOutcome::Timeout { attempts } => (
                false,
                None,
                Some(format!(
                    "Deployment timed out after {} status checks; its outcome is unknown",
                    attempts
                )),
            ),
        };
        Self {
            success,
            url,
            error,
            deployment_id: Some(deployment_id.to_string()),
        }
    }
}

/// Human-readable detail from a failure payload: Vercel's `errorCode` and
/// `errorMessage`, or a bare string reason.
fn failure_detail(reason: &serde_json::Value) -> Option<String> {
    if let Some(text) = reason.as_str() {
        return Some(text.to_string());
    }
    let code = reason.get("errorCode").and_then(|v| v.as_str());
    let message = reason.get("errorMessage").and_then(|v| v.as_str());
    match (code, message) {
        (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
        (Some(detail), None) | (None, Some(detail)) => Some(detail.to_string()),
        (None, None) => None,
    }
}

/// Resolve the branch, start a production deployment, and track it.
///
/// Provider and transport errors come back as `Err`; a deployment that
/// fails or times out is a normal `Ok` report with `success: false`.
pub async fn run<R, D>(
    source: &R,
    deployer: &D,
    registry: &TrackerRegistry,
    config: &TrackerConfig,
    repo: &RepoRef,
    cancel: &CancellationToken,
) -> Result<DeployReport, DeployError>
where
    R: RepoSource + ?Sized,
    D: Deployer + ?Sized,
{
    let branch = source.resolve_branch(repo).await?;
    info!(%repo, %branch, "Deploying");

    let request = CreateDeployment::production(&repo.owner, &repo.repo, &branch);
    let deployment = deployer.create_deployment(&request).await?;
    let job = JobId::new(deployment.id.clone())?;

    let outcome = registry.track(&job, config, deployer, cancel).await?;
    info!(%repo, deployment = %job, success = outcome.is_success(), "Deployment tracking finished");
    Ok(DeployReport::from_outcome(&job, &outcome))
}
