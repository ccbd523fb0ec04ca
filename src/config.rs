//! TOML configuration for forkship.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tracker::TrackerConfig;

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "FORKSHIP_CONFIG";

/// Config file looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "forkship.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForkshipConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ForkshipConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .tracker
            .validate()
            .with_context(|| format!("invalid [tracker] section in {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. `explicit` (a `--config` flag).
    /// 2. The path in `FORKSHIP_CONFIG`.
    /// 3. `./forkship.toml`.
    /// 4. Compiled-in defaults.
    ///
    /// A file named by the flag or the variable must load; it never falls
    /// through to the next source.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            return Self::load(&path)
                .with_context(|| format!("{} points at an unusable config file", CONFIG_ENV));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        debug!("No config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Origins allowed to call the API from a browser. Empty allows any.
    pub allowed_origins: Vec<String>,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_secs: u64,
    /// Snapshots buffered per diagnostic stream.
    pub stream_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            allowed_origins: Vec::new(),
            keep_alive_secs: 15,
            stream_capacity: crate::channel::DEFAULT_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub github_api: String,
    pub vercel_api: String,
    /// Used for GitHub API calls when set; raises the rate limit and
    /// gives access to private repositories.
    pub github_token: Option<String>,
    /// Fallback when a deploy request carries no token of its own.
    pub vercel_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            github_api: "https://api.github.com".to_string(),
            vercel_api: "https://api.vercel.com".to_string(),
            github_token: None,
            vercel_token: None,
            request_timeout_secs: 30,
        }
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::UnknownStatusPolicy;

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: ForkshipConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.tracker, TrackerConfig::default());
        assert_eq!(cfg.providers.github_api, "https://api.github.com");
        assert_eq!(cfg.providers.vercel_api, "https://api.vercel.com");
        assert!(cfg.providers.vercel_token.is_none());
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[tracker]
poll_interval_ms = 2000
unknown_status = "poll"

[logging]
json = true
"#;
        let cfg: ForkshipConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.tracker.poll_interval_ms, 2000);
        assert_eq!(cfg.tracker.max_attempts, 60);
        assert_eq!(cfg.tracker.unknown_status, UnknownStatusPolicy::Poll);
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.server.keep_alive_secs, 15);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("forkship.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1:9999"

[providers]
vercel_api = "http://localhost:4010"
"#,
        )
        .unwrap();

        let cfg = ForkshipConfig::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9999");
        assert_eq!(cfg.providers.vercel_api, "http://localhost:4010");
    }

    #[test]
    fn test_load_rejects_invalid_tracker_limits() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("forkship.toml");
        std::fs::write(&path, "[tracker]\nmax_attempts = 0\n").unwrap();

        let err = ForkshipConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("max_attempts"));
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = ForkshipConfig::resolve(Some(Path::new("/nonexistent/forkship.toml")));
        assert!(result.is_err());
    }
}
