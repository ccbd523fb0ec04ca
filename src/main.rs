use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use forkship::channel::{self, sse, ConsumeOutcome, ProgressConsumer, ProgressUpdate, Snapshot};
use forkship::config::{ForkshipConfig, LoggingConfig};
use forkship::providers::{self, github::GitHubClient, github::RepoRef, vercel::VercelClient};
use forkship::tracker::TrackerRegistry;

#[derive(Parser)]
#[command(
    name = "forkship",
    about = "Deploy GitHub repositories to Vercel and track them to completion",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (default: $FORKSHIP_CONFIG, then ./forkship.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// GitHub token for private repositories and higher rate limits
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind address (overrides [server].bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Deploy a GitHub repository to Vercel and wait for the result
    Deploy {
        /// GitHub repository URL, e.g. https://github.com/owner/repo
        #[arg(long)]
        repo_url: String,

        /// Vercel API token
        #[arg(long, env = "VERCEL_TOKEN", hide_env_values = true)]
        vercel_token: Option<String>,

        /// Delay between status checks in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Maximum number of status checks
        #[arg(long)]
        max_attempts: Option<u32>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Subscribe to a running server's repository diagnostic stream
    Watch {
        /// Diagnostic endpoint
        #[arg(long, default_value = "http://localhost:8080/api/repo-diagnostic")]
        url: String,

        /// Repository owner
        #[arg(long)]
        org: String,

        /// Repository name
        #[arg(long)]
        name: String,

        /// Print raw snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Run a repository diagnostic locally
    Diagnose {
        /// Repository owner
        #[arg(long)]
        org: String,

        /// Repository name
        #[arg(long)]
        name: String,

        /// Print raw snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancellation token that fires on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            trigger.cancel();
        }
    });
    token
}

fn print_snapshot(snapshot: &Snapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("failed to encode snapshot: {}", e),
        }
        return;
    }
    let mut line = format!("{:<18}", snapshot.status);
    for (key, value) in &snapshot.fields {
        line.push_str(&format!(" {}={}", key, value));
    }
    println!("{}", line.trim_end());
}

fn print_update(update: ProgressUpdate, json: bool) {
    match update {
        ProgressUpdate::Intermediate(snapshot) => print_snapshot(&snapshot, json),
        ProgressUpdate::Terminal(snapshot) => {
            print_snapshot(&snapshot, json);
            if !json {
                let verdict = if snapshot.success { "✅ SUCCESS" } else { "❌ FAILED" };
                println!("{}", verdict);
            }
        }
    }
}

fn finish_stream(outcome: ConsumeOutcome) -> Result<()> {
    match outcome {
        ConsumeOutcome::Completed(snapshot) if snapshot.success => Ok(()),
        ConsumeOutcome::Completed(snapshot) => {
            anyhow::bail!("job finished unsuccessfully (status {})", snapshot.status)
        }
        ConsumeOutcome::Inconclusive { reason } => {
            anyhow::bail!("outcome unknown: {}", reason)
        }
        ConsumeOutcome::Cancelled => {
            println!("Cancelled.");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ForkshipConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);
    if cli.github_token.is_some() {
        config.providers.github_token = cli.github_token;
    }

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting forkship server");
            forkship::serve(config).await?;
        }
        Commands::Deploy {
            repo_url,
            vercel_token,
            poll_interval_ms,
            max_attempts,
            json,
        } => {
            let token = vercel_token
                .or_else(|| config.providers.vercel_token.clone())
                .context("a Vercel token is required (--vercel-token or VERCEL_TOKEN)")?;
            if let Some(ms) = poll_interval_ms {
                config.tracker.poll_interval_ms = ms;
            }
            if let Some(n) = max_attempts {
                config.tracker.max_attempts = n;
            }
            let repo = RepoRef::parse_url(&repo_url)?;

            let http = providers::http_client(config.providers.request_timeout())?;
            let github = GitHubClient::new(
                http.clone(),
                &config.providers.github_api,
                config.providers.github_token.clone(),
            );
            let vercel = VercelClient::new(http, &config.providers.vercel_api, token);
            let registry = TrackerRegistry::new();

            tracing::info!(%repo, "Running deployment");
            let report = forkship::deploy::run(
                &github,
                &vercel,
                &registry,
                &config.tracker,
                &repo,
                &ctrl_c_token(),
            )
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.success {
                println!(
                    "✅ Deployment successful. URL: {}",
                    report.url.as_deref().unwrap_or("(none reported)")
                );
            }
            if !report.success {
                anyhow::bail!(report
                    .error
                    .unwrap_or_else(|| "deployment failed".to_string()));
            }
        }
        Commands::Watch {
            url,
            org,
            name,
            json,
        } => {
            let client = reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?;
            let query = [("org", org.as_str()), ("name", name.as_str())];
            let events = sse::subscribe(&client, &url, &query)
                .await
                .with_context(|| format!("failed to subscribe to {}", url))?;
            let outcome = ProgressConsumer::new()
                .consume(events, &ctrl_c_token(), |update| print_update(update, json))
                .await;
            finish_stream(outcome)?;
        }
        Commands::Diagnose { org, name, json } => {
            let repo = RepoRef::new(org, name)?;
            let http = providers::http_client(config.providers.request_timeout())?;
            let github = GitHubClient::new(
                http,
                &config.providers.github_api,
                config.providers.github_token.clone(),
            );

            let (publisher, stream) =
                channel::channel(repo.to_string(), config.server.stream_capacity);
            let job_repo = repo.clone();
            tokio::spawn(async move {
                if let Err(e) = forkship::diagnostic::run(&github, &job_repo, publisher).await {
                    tracing::debug!("Diagnostic stopped early: {}", e);
                }
            });

            let events = stream
                .into_stream()
                .map(|snapshot| serde_json::to_string(&snapshot));
            let outcome = ProgressConsumer::new()
                .consume(events, &ctrl_c_token(), |update| print_update(update, json))
                .await;
            finish_stream(outcome)?;
        }
    }

    Ok(())
}
