//! Repository diagnostic -- checks whether a repository looks deployable and
//! streams its progress as snapshots on a progress channel.

use serde::Serialize;
use tracing::{info, warn};

use crate::channel::{ChannelClosed, ProgressPublisher, Snapshot};
use crate::providers::github::{RepoRef, RepoSource};

/// `package.json` scripts a deployment needs, in the order they are checked.
pub const REQUIRED_SCRIPTS: [&str; 2] = ["build", "start"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingScripts {
    pub missing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl MissingScripts {
    fn none() -> Self {
        Self {
            missing: false,
            what: None,
            explanation: None,
        }
    }

    fn script(what: &str, explanation: String) -> Self {
        Self {
            missing: true,
            what: Some(what.to_string()),
            explanation: Some(explanation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub missing_config: bool,
    pub missing_scripts: MissingScripts,
}

impl Diagnosis {
    pub fn is_deployable(&self) -> bool {
        !self.missing_config && !self.missing_scripts.missing
    }
}

/// Judge a repository from its `package.json`, if it has one.
pub fn evaluate(manifest: Option<&serde_json::Value>) -> Diagnosis {
    let Some(manifest) = manifest else {
        return Diagnosis {
            missing_config: true,
            missing_scripts: MissingScripts::script(
                "install",
                "No package.json found, so there is nothing to install or build.".to_string(),
            ),
        };
    };

    let scripts = manifest.get("scripts").and_then(|s| s.as_object());
    let missing = REQUIRED_SCRIPTS.iter().find(|name| {
        !scripts
            .and_then(|s| s.get(**name))
            .and_then(|v| v.as_str())
            .is_some_and(|cmd| !cmd.trim().is_empty())
    });

    let missing_scripts = match missing {
        Some(name) => MissingScripts::script(
            name,
            format!("package.json does not declare a non-empty \"{}\" script.", name),
        ),
        None => MissingScripts::none(),
    };

    Diagnosis {
        missing_config: false,
        missing_scripts,
    }
}

/// Run the diagnostic for `repo`, reporting through `publisher`.
///
/// Always ends with exactly one terminal snapshot unless the subscriber
/// goes away first, in which case the run stops at the next publish.
pub async fn run<R>(
    source: &R,
    repo: &RepoRef,
    publisher: ProgressPublisher,
) -> Result<(), ChannelClosed>
where
    R: RepoSource + ?Sized,
{
    let run_id = uuid::Uuid::new_v4();
    info!(%run_id, %repo, "Repository diagnostic started");
    let base = |status: &str| {
        Snapshot::new(status)
            .with("runId", run_id.to_string())
            .with("repo", repo.to_string())
    };

    publisher.publish(base("RESOLVING_BRANCH")).await?;
    let branch = match source.resolve_branch(repo).await {
        Ok(branch) => branch,
        Err(e) => {
            warn!(%run_id, %repo, "Branch resolution failed: {}", e);
            return publisher
                .finish(base("ERROR").with("error", e.to_string()))
                .await;
        }
    };

    publisher
        .publish(base("READING_MANIFEST").with("branch", branch.clone()))
        .await?;
    let manifest = match source.fetch_manifest(repo, &branch).await {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(%run_id, %repo, %branch, "Manifest fetch failed: {}", e);
            return publisher
                .finish(
                    base("ERROR")
                        .with("branch", branch)
                        .with("error", e.to_string()),
                )
                .await;
        }
    };

    let diagnosis = evaluate(manifest.as_ref());
    info!(%run_id, %repo, deployable = diagnosis.is_deployable(), "Repository diagnostic finished");
    publisher
        .finish(
            base("COMPLETE")
                .with_success(diagnosis.is_deployable())
                .with("branch", branch)
                .with("missingConfig", diagnosis.missing_config)
                .with("missingScripts", serde_json::json!(diagnosis.missing_scripts)),
        )
        .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use serde_json::json;

    pub(crate) struct StubSource {
        pub(crate) branch: Result<String, String>,
        pub(crate) manifest: Option<serde_json::Value>,
    }

    impl StubSource {
        pub(crate) fn deployable() -> Self {
            Self {
                branch: Ok("main".to_string()),
                manifest: Some(json!({ "scripts": { "build": "next build", "start": "next start" } })),
            }
        }
    }

    #[async_trait]
    impl RepoSource for StubSource {
        async fn resolve_branch(&self, repo: &RepoRef) -> Result<String, ProviderError> {
            self.branch
                .clone()
                .map_err(|_| ProviderError::NoDeployableBranch(repo.to_string()))
        }

        async fn fetch_manifest(
            &self,
            _repo: &RepoRef,
            _branch: &str,
        ) -> Result<Option<serde_json::Value>, ProviderError> {
            Ok(self.manifest.clone())
        }
    }

    fn repo() -> RepoRef {
        RepoRef::new("acme", "site").unwrap()
    }

    #[test]
    fn test_evaluate_complete_manifest() {
        let manifest = json!({ "scripts": { "build": "vite build", "start": "vite preview" } });
        let diagnosis = evaluate(Some(&manifest));
        assert!(diagnosis.is_deployable());
        assert_eq!(
            serde_json::to_value(&diagnosis.missing_scripts).unwrap(),
            json!({ "missing": false })
        );
    }

    #[test]
    fn test_evaluate_reports_first_missing_script() {
        let manifest = json!({ "scripts": { "start": "node server.js", "build": "  " } });
        let diagnosis = evaluate(Some(&manifest));
        assert!(!diagnosis.missing_config);
        assert!(!diagnosis.is_deployable());
        assert_eq!(diagnosis.missing_scripts.what.as_deref(), Some("build"));

        let no_scripts = evaluate(Some(&json!({ "name": "site" })));
        assert_eq!(no_scripts.missing_scripts.what.as_deref(), Some("build"));
    }

    #[test]
    fn test_evaluate_without_manifest() {
        let diagnosis = evaluate(None);
        assert!(diagnosis.missing_config);
        assert!(diagnosis.missing_scripts.missing);
    }

    #[tokio::test]
    async fn test_run_streams_progress_then_single_terminal() {
        let (publisher, stream) = channel::channel("acme/site", 8);
        run(&StubSource::deployable(), &repo(), publisher).await.unwrap();

        let events: Vec<Snapshot> = futures::StreamExt::collect(stream.into_stream()).await;
        let statuses: Vec<&str> = events.iter().map(|s| s.status.as_str()).collect();
        assert_eq!(statuses, vec!["RESOLVING_BRANCH", "READING_MANIFEST", "COMPLETE"]);
        assert_eq!(events.iter().filter(|s| s.complete).count(), 1);

        let last = events.last().unwrap();
        assert!(last.complete);
        assert!(last.success);
        assert_eq!(last.field("branch"), Some(&json!("main")));
        assert_eq!(last.field("missingConfig"), Some(&json!(false)));
        assert_eq!(last.field("missingScripts"), Some(&json!({ "missing": false })));
    }

    #[tokio::test]
    async fn test_run_reports_provider_error_as_terminal() {
        let source = StubSource {
            branch: Err("no branch".to_string()),
            manifest: None,
        };
        let (publisher, stream) = channel::channel("acme/site", 8);
        run(&source, &repo(), publisher).await.unwrap();

        let events: Vec<Snapshot> = futures::StreamExt::collect(stream.into_stream()).await;
        assert_eq!(events.len(), 2);
        let last = &events[1];
        assert_eq!(last.status, "ERROR");
        assert!(last.complete);
        assert!(!last.success);
        assert!(last.field("error").is_some());
    }

    #[tokio::test]
    async fn test_run_stops_when_subscriber_leaves() {
        let (publisher, stream) = channel::channel("acme/site", 8);
        drop(stream);
        let err = run(&StubSource::deployable(), &repo(), publisher)
            .await
            .unwrap_err();
        assert_eq!(err.key, "acme/site");
    }
}
