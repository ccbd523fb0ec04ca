//! GitHub: repository URL handling, deployable branch lookup, manifest fetch,
//! and the repository operations behind `/api/github/*` (info, fork, file
//! write, pull request).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{check, ProviderError};

const PROVIDER: &str = "GitHub";
const JSON_ACCEPT: &str = "application/vnd.github+json";

/// Branches a deployment may be built from, in preference order.
pub const DEPLOYABLE_BRANCHES: [&str; 2] = ["main", "master"];

/// `owner/repo` pair identifying a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Result<Self, ProviderError> {
        let owner = owner.into();
        let repo = repo.into();
        if !is_valid_name(&owner) || !is_valid_name(&repo) {
            return Err(ProviderError::InvalidRepoUrl(format!("{}/{}", owner, repo)));
        }
        Ok(Self { owner, repo })
    }

    /// Parse `https://github.com/<owner>/<repo>[.git][/...]`.
    pub fn parse_url(input: &str) -> Result<Self, ProviderError> {
        let invalid = || ProviderError::InvalidRepoUrl(input.to_string());
        let url = Url::parse(input.trim()).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "https" | "http") || url.host_str() != Some("github.com") {
            return Err(invalid());
        }
        let mut segments = url
            .path_segments()
            .ok_or_else(invalid)?
            .filter(|s| !s.is_empty());
        let owner = segments.next().ok_or_else(invalid)?;
        let repo = segments.next().ok_or_else(invalid)?;
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        Self::new(owner, repo).map_err(|_| invalid())
    }

    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoRef {
    type Err = ProviderError;

    /// Accepts either a GitHub URL or a bare `owner/repo`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains("://") {
            return Self::parse_url(s);
        }
        match s.split_once('/') {
            Some((owner, repo)) => Self::new(owner, repo),
            None => Err(ProviderError::InvalidRepoUrl(s.to_string())),
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    pub name: String,
}

/// First branch of the listing that is deployable.
pub fn pick_branch(branches: &[Branch]) -> Option<&str> {
    branches
        .iter()
        .map(|b| b.name.as_str())
        .find(|name| DEPLOYABLE_BRANCHES.contains(name))
}

/// Read access to source repositories.
#[async_trait]
pub trait RepoSource: Send + Sync {
    /// The branch deployments should be built from.
    async fn resolve_branch(&self, repo: &RepoRef) -> Result<String, ProviderError>;

    /// `package.json` at `branch`, or `None` when the repository has none.
    async fn fetch_manifest(
        &self,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Option<serde_json::Value>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(http: Client, api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Same client acting with `token`.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..self.clone()
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, format!("{}{}", self.api_base, path))
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
        let response = request.header(ACCEPT, JSON_ACCEPT).send().await?;
        Ok(check(PROVIDER, response).await?.json().await?)
    }

    /// Repository metadata.
    pub async fn repo_info(&self, repo: &RepoRef) -> Result<RepoInfo, ProviderError> {
        let raw: RawRepo =
            Self::send_json(self.get(&format!("/repos/{}/{}", repo.owner, repo.repo))).await?;
        Ok(raw.into())
    }

    /// Fork `repo` into the authenticated account, or into `organization`.
    ///
    /// GitHub answers 403 when the account already owns a fork; the existing
    /// fork is returned in that case.
    pub async fn fork(
        &self,
        repo: &RepoRef,
        organization: Option<&str>,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut body = serde_json::Map::new();
        if let Some(org) = organization {
            body.insert("organization".to_string(), org.into());
        }
        let request = self
            .request(Method::POST, &format!("/repos/{}/{}/forks", repo.owner, repo.repo))
            .json(&body);
        match Self::send_json(request).await {
            Err(ProviderError::Status { status: 403, .. }) => {
                let user: AuthenticatedUser = Self::send_json(self.get("/user")).await?;
                info!(%repo, login = %user.login, "Fork refused, returning existing fork");
                Self::send_json(self.get(&format!("/repos/{}/{}", user.login, repo.repo))).await
            }
            other => other,
        }
    }

    /// Create `write.path`, or update it when it already exists.
    pub async fn put_file(&self, write: &FileWrite) -> Result<serde_json::Value, ProviderError> {
        let path = write.contents_path();
        let mut lookup = self.get(&path);
        if let Some(branch) = &write.branch {
            lookup = lookup.query(&[("ref", branch)]);
        }
        let response = lookup.header(ACCEPT, JSON_ACCEPT).send().await?;
        let sha = if response.status() == StatusCode::NOT_FOUND {
            None
        } else {
            let existing: serde_json::Value = check(PROVIDER, response).await?.json().await?;
            existing_file_sha(&existing)
        };
        debug!(repo = %write.repo, path = %write.path, update = sha.is_some(), "Writing file");

        Self::send_json(self.request(Method::PUT, &path).json(&write.body(sha))).await
    }

    /// Open a pull request against `repo`.
    pub async fn create_pull(
        &self,
        repo: &RepoRef,
        pull: &NewPullRequest,
    ) -> Result<serde_json::Value, ProviderError> {
        let request = self
            .request(Method::POST, &format!("/repos/{}/{}/pulls", repo.owner, repo.repo))
            .json(pull);
        Self::send_json(request).await
    }
}

// ---------------------------------------------------------------------------
// Repository operations
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawLicense {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    owner: RawOwner,
    name: String,
    full_name: String,
    description: Option<String>,
    private: bool,
    default_branch: String,
    stargazers_count: u64,
    forks_count: u64,
    language: Option<String>,
    html_url: String,
    clone_url: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    size: u64,
    open_issues_count: u64,
    #[serde(default)]
    topics: Vec<String>,
    license: Option<RawLicense>,
}

#[derive(Debug, Deserialize)]
struct AuthenticatedUser {
    login: String,
}

/// Repository summary returned by `/api/github/repo/info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub default_branch: String,
    pub stars: u64,
    pub forks: u64,
    pub language: Option<String>,
    pub url: String,
    pub clone_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub size: u64,
    pub open_issues: u64,
    pub topics: Vec<String>,
    pub license: Option<String>,
}

impl From<RawRepo> for RepoInfo {
    fn from(raw: RawRepo) -> Self {
        Self {
            owner: raw.owner.login,
            name: raw.name,
            full_name: raw.full_name,
            description: raw.description,
            is_private: raw.private,
            default_branch: raw.default_branch,
            stars: raw.stargazers_count,
            forks: raw.forks_count,
            language: raw.language,
            url: raw.html_url,
            clone_url: raw.clone_url,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            size: raw.size,
            open_issues: raw.open_issues_count,
            topics: raw.topics,
            license: raw.license.map(|l| l.name),
        }
    }
}

/// A file to create or overwrite through the contents API.
#[derive(Debug, Clone)]
pub struct FileWrite {
    pub repo: RepoRef,
    pub path: String,
    /// Plain text; encoded before upload.
    pub content: String,
    pub message: String,
    pub branch: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

impl FileWrite {
    fn contents_path(&self) -> String {
        format!(
            "/repos/{}/{}/contents/{}",
            self.repo.owner,
            self.repo.repo,
            self.path.trim_start_matches('/')
        )
    }

    fn body(&self, sha: Option<String>) -> PutContents<'_> {
        PutContents {
            message: &self.message,
            content: base64::engine::general_purpose::STANDARD.encode(self.content.as_bytes()),
            branch: self.branch.as_deref(),
            sha,
        }
    }
}

/// SHA of an existing regular file; directories and symlinks have none to reuse.
fn existing_file_sha(entry: &serde_json::Value) -> Option<String> {
    if entry.get("type").and_then(|t| t.as_str()) != Some("file") {
        return None;
    }
    entry.get("sha").and_then(|s| s.as_str()).map(str::to_string)
}

/// Body of `POST /repos/{owner}/{repo}/pulls`.
#[derive(Debug, Clone, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    /// Branch name, or `owner:branch` for a fork.
    pub head: String,
    pub base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<bool>,
}

#[async_trait]
impl RepoSource for GitHubClient {
    async fn resolve_branch(&self, repo: &RepoRef) -> Result<String, ProviderError> {
        let response = self
            .get(&format!("/repos/{}/{}/branches", repo.owner, repo.repo))
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let branches: Vec<Branch> = check(PROVIDER, response).await?.json().await?;
        debug!(%repo, count = branches.len(), "Listed branches");
        pick_branch(&branches)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::NoDeployableBranch(repo.to_string()))
    }

    async fn fetch_manifest(
        &self,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Option<serde_json::Value>, ProviderError> {
        let response = self
            .get(&format!("/repos/{}/{}/contents/package.json", repo.owner, repo.repo))
            .query(&[("ref", branch)])
            .header(ACCEPT, "application/vnd.github.raw+json")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%repo, %branch, "No package.json");
            return Ok(None);
        }
        let body = check(PROVIDER, response).await?.text().await?;
        let manifest = serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
            provider: PROVIDER,
            message: format!("package.json is not valid JSON: {}", e),
        })?;
        Ok(Some(manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_url() {
        let repo = RepoRef::parse_url("https://github.com/afuma/Deploy-Anything").unwrap();
        assert_eq!(repo.owner, "afuma");
        assert_eq!(repo.repo, "Deploy-Anything");
        assert_eq!(repo.to_string(), "afuma/Deploy-Anything");
    }

    #[test]
    fn test_parse_repo_url_strips_git_suffix_and_extra_path() {
        let repo = RepoRef::parse_url("https://github.com/acme/site.git").unwrap();
        assert_eq!(repo.repo, "site");

        let repo = RepoRef::parse_url("https://github.com/acme/site/tree/main/src").unwrap();
        assert_eq!(repo, RepoRef::new("acme", "site").unwrap());
    }

    #[test]
    fn test_rejects_non_github_urls() {
        for input in [
            "https://gitlab.com/acme/site",
            "https://github.com/acme",
            "https://github.com/",
            "not a url",
            "ftp://github.com/acme/site",
            "https://github.com/acme/../site",
        ] {
            assert!(
                matches!(RepoRef::parse_url(input), Err(ProviderError::InvalidRepoUrl(_))),
                "accepted {input}"
            );
        }
    }

    #[test]
    fn test_from_str_accepts_owner_slash_repo() {
        let repo: RepoRef = "acme/site".parse().unwrap();
        assert_eq!(repo.html_url(), "https://github.com/acme/site");
        assert!("acme".parse::<RepoRef>().is_err());
    }

    #[test]
    fn test_repo_info_from_api_response() {
        let raw: RawRepo = serde_json::from_value(serde_json::json!({
            "owner": { "login": "afuma" },
            "name": "Deploy-Anything",
            "full_name": "afuma/Deploy-Anything",
            "description": null,
            "private": false,
            "default_branch": "main",
            "stargazers_count": 12,
            "forks_count": 3,
            "language": "TypeScript",
            "html_url": "https://github.com/afuma/Deploy-Anything",
            "clone_url": "https://github.com/afuma/Deploy-Anything.git",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-06-01T10:00:00Z",
            "size": 420,
            "open_issues_count": 1,
            "license": { "name": "MIT License" }
        }))
        .unwrap();

        let info = RepoInfo::from(raw);
        assert_eq!(info.owner, "afuma");
        assert_eq!(info.stars, 12);
        assert!(info.topics.is_empty());
        assert_eq!(info.license.as_deref(), Some("MIT License"));

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["fullName"], "afuma/Deploy-Anything");
        assert_eq!(value["isPrivate"], false);
        assert_eq!(value["openIssues"], 1);
    }

    #[test]
    fn test_file_write_body_encodes_content() {
        let write = FileWrite {
            repo: RepoRef::new("acme", "site").unwrap(),
            path: "/docs/hello.md".to_string(),
            content: "hello world".to_string(),
            message: "Add hello".to_string(),
            branch: None,
        };
        assert_eq!(write.contents_path(), "/repos/acme/site/contents/docs/hello.md");

        let body = serde_json::to_value(write.body(None)).unwrap();
        assert_eq!(body["content"], "aGVsbG8gd29ybGQ=");
        assert_eq!(body["message"], "Add hello");
        assert!(body.get("sha").is_none());
        assert!(body.get("branch").is_none());

        let update = FileWrite {
            branch: Some("dev".to_string()),
            ..write
        };
        let body = serde_json::to_value(update.body(Some("abc123".to_string()))).unwrap();
        assert_eq!(body["sha"], "abc123");
        assert_eq!(body["branch"], "dev");
    }

    #[test]
    fn test_existing_sha_only_for_regular_files() {
        let file = serde_json::json!({ "type": "file", "sha": "abc123" });
        assert_eq!(existing_file_sha(&file).as_deref(), Some("abc123"));

        let dir = serde_json::json!([{ "type": "file", "sha": "abc123" }]);
        assert_eq!(existing_file_sha(&dir), None);

        let link = serde_json::json!({ "type": "symlink", "sha": "def456" });
        assert_eq!(existing_file_sha(&link), None);
    }

    #[test]
    fn test_pull_request_body_skips_unset_fields() {
        let pull = NewPullRequest {
            title: "Add Vercel config".to_string(),
            head: "me:deploy".to_string(),
            base: "main".to_string(),
            body: None,
            draft: Some(true),
        };
        let value = serde_json::to_value(&pull).unwrap();
        assert_eq!(value["head"], "me:deploy");
        assert_eq!(value["draft"], true);
        assert!(value.get("body").is_none());
    }

    #[test]
    fn test_pick_branch_takes_first_deployable() {
        let branches = |names: &[&str]| -> Vec<Branch> {
            names.iter().map(|n| Branch { name: n.to_string() }).collect()
        };
        assert_eq!(pick_branch(&branches(&["dev", "main"])), Some("main"));
        assert_eq!(pick_branch(&branches(&["master", "main"])), Some("master"));
        assert_eq!(pick_branch(&branches(&["dev", "feature/x"])), None);
        assert_eq!(pick_branch(&[]), None);
    }
}
