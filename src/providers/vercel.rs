//! Vercel deployments: creation, status lookup, and status classification.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{check, ProviderError};
use crate::tracker::{JobId, JobStatus, StatusClass, StatusFetcher, StatusReport};

const PROVIDER: &str = "Vercel";

/// Deployment `readyState` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeploymentStatus {
    Queued,
    Initializing,
    Building,
    Ready,
    Error,
    Canceled,
    /// Anything Vercel adds after this client was written.
    Unknown(String),
}

impl From<&str> for DeploymentStatus {
    fn from(s: &str) -> Self {
        match s {
            "QUEUED" => Self::Queued,
            "INITIALIZING" => Self::Initializing,
            "BUILDING" => Self::Building,
            "READY" => Self::Ready,
            "ERROR" => Self::Error,
            "CANCELED" => Self::Canceled,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for DeploymentStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<DeploymentStatus> for String {
    fn from(status: DeploymentStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Initializing => write!(f, "INITIALIZING"),
            Self::Building => write!(f, "BUILDING"),
            Self::Ready => write!(f, "READY"),
            Self::Error => write!(f, "ERROR"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

impl JobStatus for DeploymentStatus {
    fn class(&self) -> StatusClass {
        match self {
            Self::Queued | Self::Initializing | Self::Building => StatusClass::Pending,
            Self::Ready => StatusClass::Succeeded,
            Self::Error | Self::Canceled => StatusClass::Failed,
            Self::Unknown(_) => StatusClass::Unrecognized,
        }
    }
}

/// Deployment as returned by `POST /v13/deployments` and `GET /v13/deployments/{id}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    /// Hostname without scheme, e.g. `my-app-abc123.vercel.app`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<DeploymentStatus>,
    #[serde(default)]
    pub ready_state: Option<DeploymentStatus>,
    /// Set on failed deployments, e.g. `BUILD_FAILED`.
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Deployment {
    pub fn state(&self) -> DeploymentStatus {
        self.status
            .clone()
            .or_else(|| self.ready_state.clone())
            .unwrap_or_else(|| DeploymentStatus::Unknown(String::new()))
    }

    /// Public URL with scheme, when Vercel has assigned one.
    pub fn public_url(&self) -> Option<String> {
        self.url.as_ref().map(|host| format!("https://{}", host))
    }

    /// Payload attached to each status report. Error fields appear only
    /// when Vercel set them.
    pub fn status_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "id": self.id,
            "url": self.public_url(),
        });
        if let Some(code) = &self.error_code {
            payload["errorCode"] = code.clone().into();
        }
        if let Some(message) = &self.error_message {
            payload["errorMessage"] = message.clone().into();
        }
        payload
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GitSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub org: String,
}

/// Request body for a production deployment built from a GitHub branch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeployment {
    pub name: String,
    pub target: &'static str,
    pub git_source: GitSource,
}

impl CreateDeployment {
    pub fn production(org: &str, repo: &str, branch: &str) -> Self {
        Self {
            name: repo.to_lowercase(),
            target: "production",
            git_source: GitSource {
                kind: "github",
                repo: repo.to_string(),
                git_ref: branch.to_string(),
                org: org.to_string(),
            },
        }
    }
}

/// Something that can start deployments and report their status.
#[async_trait]
pub trait Deployer: StatusFetcher<Status = DeploymentStatus> {
    async fn create_deployment(
        &self,
        request: &CreateDeployment,
    ) -> Result<Deployment, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct VercelClient {
    http: Client,
    api_base: String,
    token: String,
}

impl VercelClient {
    pub fn new(http: Client, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub async fn get_deployment(&self, id: &str) -> Result<Deployment, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v13/deployments/{}", self.api_base, id))
            .query(&[("withGitRepoInfo", "true")])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let deployment: Deployment = check(PROVIDER, response).await?.json().await?;
        Ok(deployment)
    }
}

#[async_trait]
impl Deployer for VercelClient {
    async fn create_deployment(
        &self,
        request: &CreateDeployment,
    ) -> Result<Deployment, ProviderError> {
        let response = self
            .http
            .post(format!("{}/v13/deployments", self.api_base))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let deployment: Deployment = check(PROVIDER, response).await?.json().await?;
        info!(id = %deployment.id, status = %deployment.state(), "Deployment created");
        Ok(deployment)
    }
}

#[async_trait]
impl StatusFetcher for VercelClient {
    type Status = DeploymentStatus;

    async fn fetch_status(&self, job: &JobId) -> anyhow::Result<StatusReport<DeploymentStatus>> {
        let deployment = self.get_deployment(job.as_str()).await?;
        let status = deployment.state();
        debug!(id = %deployment.id, %status, "Deployment status");
        Ok(StatusReport::new(status).with_payload(deployment.status_payload()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_partition() {
        use DeploymentStatus::*;
        for s in [Queued, Initializing, Building] {
            assert_eq!(s.class(), StatusClass::Pending);
            assert!(!s.is_terminal());
        }
        assert_eq!(Ready.class(), StatusClass::Succeeded);
        assert_eq!(Error.class(), StatusClass::Failed);
        assert_eq!(Canceled.class(), StatusClass::Failed);
        assert_eq!(
            DeploymentStatus::from("DELETED").class(),
            StatusClass::Unrecognized
        );
    }

    #[test]
    fn test_unknown_status_keeps_its_text() {
        let status = DeploymentStatus::from("DELETED");
        assert_eq!(status, DeploymentStatus::Unknown("DELETED".to_string()));
        assert_eq!(status.to_string(), "DELETED");
        assert_eq!(DeploymentStatus::from("READY").to_string(), "READY");
    }

    #[test]
    fn test_deployment_prefers_status_then_ready_state() {
        let d: Deployment = serde_json::from_str(
            r#"{"id":"dpl_1","url":"site-abc.vercel.app","readyState":"BUILDING"}"#,
        )
        .unwrap();
        assert_eq!(d.state(), DeploymentStatus::Building);
        assert_eq!(d.public_url().as_deref(), Some("https://site-abc.vercel.app"));

        let d: Deployment = serde_json::from_str(
            r#"{"id":"dpl_1","status":"READY","readyState":"BUILDING"}"#,
        )
        .unwrap();
        assert_eq!(d.state(), DeploymentStatus::Ready);
        assert_eq!(d.public_url(), None);
    }

    #[test]
    fn test_failed_deployment_payload_carries_error_details() {
        let d: Deployment = serde_json::from_str(
            r#"{"id":"dpl_1","readyState":"ERROR","errorCode":"BUILD_FAILED","errorMessage":"Command \"npm run build\" exited with 1"}"#,
        )
        .unwrap();
        assert_eq!(d.state(), DeploymentStatus::Error);

        let payload = d.status_payload();
        assert_eq!(payload["id"], "dpl_1");
        assert_eq!(payload["errorCode"], "BUILD_FAILED");
        assert_eq!(payload["errorMessage"], "Command \"npm run build\" exited with 1");

        let ok: Deployment =
            serde_json::from_str(r#"{"id":"dpl_2","url":"a.vercel.app","readyState":"READY"}"#)
                .unwrap();
        let payload = ok.status_payload();
        assert_eq!(payload["url"], "https://a.vercel.app");
        assert!(payload.get("errorCode").is_none());
    }

    #[test]
    fn test_create_request_body() {
        let body = serde_json::to_value(CreateDeployment::production(
            "afuma",
            "Deploy-Anything",
            "main",
        ))
        .unwrap();
        assert_eq!(body["name"], "deploy-anything");
        assert_eq!(body["target"], "production");
        assert_eq!(body["gitSource"]["type"], "github");
        assert_eq!(body["gitSource"]["repo"], "Deploy-Anything");
        assert_eq!(body["gitSource"]["ref"], "main");
        assert_eq!(body["gitSource"]["org"], "afuma");
    }
}
