//! API route definitions.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::channel;
use crate::deploy::{self, DeployReport};
use crate::diagnostic;
use crate::providers::github::{FileWrite, GitHubClient, NewPullRequest, RepoRef};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/deploy", post(deploy_repo))
        .route("/repo-diagnostic", get(repo_diagnostic))
        .route("/trackers", get(list_trackers))
        .route("/github/repo/info", post(github_repo_info))
        .route("/github/repo/fork", post(github_fork))
        .route("/github/file/create", post(github_put_file))
        .route("/github/pr/create", post(github_create_pull))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_trackers(State(state): State<AppState>) -> Json<Value> {
    let active = state.registry.active();
    Json(json!({ "data": active, "meta": { "total": active.len() } }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployBody {
    repo_url: Option<String>,
    vercel_token: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Deploy a GitHub repository and hold the request open until the
/// deployment settles.
async fn deploy_repo(
    State(state): State<AppState>,
    body: Result<Json<DeployBody>, JsonRejection>,
) -> ApiResult<Json<DeployReport>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let repo_url = non_empty(body.repo_url);
    let token = non_empty(body.vercel_token).or_else(|| state.config.providers.vercel_token.clone());
    let (Some(repo_url), Some(token)) = (repo_url, token) else {
        return Err(ApiError::BadRequest(
            "Missing repoUrl or vercelToken".to_string(),
        ));
    };

    let repo = RepoRef::parse_url(&repo_url)?;
    info!(%repo, "Deploy requested");

    let vercel = state.vercel(&token);
    let cancel = state.shutdown.child_token();
    let report = deploy::run(
        state.repos.as_ref(),
        &vercel,
        &state.registry,
        &state.config.tracker,
        &repo,
        &cancel,
    )
    .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct DiagnosticQuery {
    org: String,
    name: String,
}

/// Run a repository diagnostic, streaming snapshots as Server-Sent Events.
/// The stream ends right after the terminal (`complete: true`) snapshot.
async fn repo_diagnostic(
    State(state): State<AppState>,
    query: Result<Query<DiagnosticQuery>, QueryRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let repo = RepoRef::new(query.org, query.name)?;

    let (publisher, stream) =
        channel::channel(repo.to_string(), state.config.server.stream_capacity);
    let repos = Arc::clone(&state.repos);
    tokio::spawn(async move {
        if let Err(e) = diagnostic::run(repos.as_ref(), &repo, publisher).await {
            debug!(%repo, "Diagnostic stopped early: {}", e);
        }
    });

    let events = stream
        .into_stream()
        .map(|snapshot| Event::default().json_data(&snapshot));
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(state.config.server.keep_alive())))
}

// ---------------------------------------------------------------------------
// GitHub repository operations
// ---------------------------------------------------------------------------

/// Reject the request with 400 naming every required field that is absent
/// or blank.
fn require(fields: &[(&str, Option<&str>)]) -> ApiResult<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.map_or(true, |v| v.trim().is_empty()))
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ApiError::BadRequest(format!(
        "Missing parameters: {}",
        missing.join(", ")
    )))
}

/// GitHub client acting with the request's token, or the configured one.
fn github_client(state: &AppState, token: Option<String>) -> ApiResult<GitHubClient> {
    non_empty(token)
        .or_else(|| state.config.providers.github_token.clone())
        .map(|token| state.github(token))
        .ok_or_else(|| {
            ApiError::Unauthorized(
                "A GitHub token is required: send githubToken or set providers.github_token"
                    .to_string(),
            )
        })
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepoBody {
    owner: Option<String>,
    repo: Option<String>,
    organization: Option<String>,
    github_token: Option<String>,
}

impl RepoBody {
    fn repo_ref(&self) -> ApiResult<RepoRef> {
        require(&[("owner", self.owner.as_deref()), ("repo", self.repo.as_deref())])?;
        let owner = self.owner.clone().unwrap_or_default();
        let repo = self.repo.clone().unwrap_or_default();
        Ok(RepoRef::new(owner.trim(), repo.trim())?)
    }
}

async fn github_repo_info(
    State(state): State<AppState>,
    body: Result<Json<RepoBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = parse_body(body)?;
    let repo = body.repo_ref()?;
    let github = github_client(&state, body.github_token)?;

    let info = github.repo_info(&repo).await?;
    Ok(Json(json!({ "repository": info })))
}

async fn github_fork(
    State(state): State<AppState>,
    body: Result<Json<RepoBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = parse_body(body)?;
    let repo = body.repo_ref()?;
    let github = github_client(&state, body.github_token)?;

    info!(%repo, organization = ?body.organization, "Fork requested");
    let organization = non_empty(body.organization);
    let fork = github.fork(&repo, organization.as_deref()).await?;
    Ok(Json(fork))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileBody {
    owner: Option<String>,
    repo: Option<String>,
    path: Option<String>,
    content: Option<String>,
    message: Option<String>,
    branch: Option<String>,
    github_token: Option<String>,
}

async fn github_put_file(
    State(state): State<AppState>,
    body: Result<Json<FileBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = parse_body(body)?;
    require(&[
        ("owner", body.owner.as_deref()),
        ("repo", body.repo.as_deref()),
        ("path", body.path.as_deref()),
        ("content", body.content.as_deref()),
        ("message", body.message.as_deref()),
    ])?;
    let repo = RepoRef::new(
        body.owner.unwrap_or_default().trim(),
        body.repo.unwrap_or_default().trim(),
    )?;
    let github = github_client(&state, body.github_token)?;

    let write = FileWrite {
        repo,
        path: body.path.unwrap_or_default(),
        content: body.content.unwrap_or_default(),
        message: body.message.unwrap_or_default(),
        branch: non_empty(body.branch),
    };
    info!(repo = %write.repo, path = %write.path, "File write requested");
    Ok(Json(github.put_file(&write).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullBody {
    owner: Option<String>,
    repo: Option<String>,
    title: Option<String>,
    head: Option<String>,
    base: Option<String>,
    body: Option<String>,
    draft: Option<bool>,
    github_token: Option<String>,
}

async fn github_create_pull(
    State(state): State<AppState>,
    body: Result<Json<PullBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = parse_body(body)?;
    require(&[
        ("owner", body.owner.as_deref()),
        ("repo", body.repo.as_deref()),
        ("title", body.title.as_deref()),
        ("head", body.head.as_deref()),
        ("base", body.base.as_deref()),
    ])?;
    let repo = RepoRef::new(
        body.owner.unwrap_or_default().trim(),
        body.repo.unwrap_or_default().trim(),
    )?;
    let github = github_client(&state, body.github_token)?;

    let pull = NewPullRequest {
        title: body.title.unwrap_or_default(),
        head: body.head.unwrap_or_default(),
        base: body.base.unwrap_or_default(),
        body: non_empty(body.body),
        draft: body.draft,
    };
    info!(%repo, head = %pull.head, base = %pull.base, "Pull request requested");
    Ok(Json(github.create_pull(&repo, &pull).await?))
}
