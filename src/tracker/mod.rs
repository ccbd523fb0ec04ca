//! Job completion tracking -- status classification, limits, and outcomes.
//!
//! A tracked job lives on some remote provider (a Vercel deployment, a
//! diagnostic run). The tracker only observes it: it asks for the current
//! status until the status is terminal or the attempt budget runs out, and
//! reports exactly one [`TrackerOutcome`].

pub mod latch;
pub mod poll;
pub mod registry;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::latch::Latch;
pub use self::poll::{track, StatusFetcher};
pub use self::registry::{TrackerLease, TrackerRegistry};

/// Opaque identifier of a unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Result<Self, TrackError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TrackError::EmptyJobId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the terminal partition a status falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// Still queued or running; keep observing.
    Pending,
    /// Terminal, finished successfully.
    Succeeded,
    /// Terminal, finished unsuccessfully (error, canceled).
    Failed,
    /// Not part of the provider's known set.
    Unrecognized,
}

/// A provider-defined job status.
pub trait JobStatus: fmt::Display + Clone + Send + Sync + 'static {
    fn class(&self) -> StatusClass;

    fn is_terminal(&self) -> bool {
        matches!(self.class(), StatusClass::Succeeded | StatusClass::Failed)
    }
}

/// One answer from a [`StatusFetcher`].
#[derive(Debug, Clone)]
pub struct StatusReport<S> {
    pub status: S,
    /// Auxiliary provider data (deployment URL, error detail).
    pub payload: Option<serde_json::Value>,
}

impl<S> StatusReport<S> {
    pub fn new(status: S) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// What to do with a status outside the provider's known set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStatusPolicy {
    /// Treat it as non-terminal and keep polling until the attempt bound.
    Poll,
    /// Stop immediately with a failure outcome.
    #[default]
    Fail,
}

/// Polling limits for the poll variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay between two status checks, in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound on status checks that observe a non-terminal status.
    pub max_attempts: u32,
    pub unknown_status: UnknownStatusPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        // 60 checks at 5s: five minutes.
        Self {
            poll_interval_ms: 5_000,
            max_attempts: 60,
            unknown_status: UnknownStatusPolicy::Fail,
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        if self.poll_interval_ms == 0 {
            return Err(TrackError::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(TrackError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The single terminal result of tracking a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "terminal", rename_all = "snake_case")]
pub enum TrackerOutcome {
    Success {
        payload: Option<serde_json::Value>,
    },
    Failure {
        status: String,
        reason: Option<serde_json::Value>,
    },
    /// The attempt budget ran out while the job was still pending.
    /// The job's real outcome is unknown.
    Timeout { attempts: u32 },
}

impl TrackerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("job identifier must not be empty")]
    EmptyJobId,

    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),

    /// The status check itself failed. Never retried by the tracker.
    #[error("status check for job {job} failed on attempt {attempt}: {error:#}")]
    Fetch {
        job: JobId,
        attempt: u32,
        error: anyhow::Error,
    },

    #[error("tracking of job {job} was cancelled")]
    Cancelled { job: JobId },

    #[error("job {job} is already being tracked")]
    AlreadyTracked { job: JobId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_rejects_blank() {
        assert!(matches!(JobId::new(""), Err(TrackError::EmptyJobId)));
        assert!(matches!(JobId::new("   "), Err(TrackError::EmptyJobId)));
        assert_eq!(JobId::new("dpl_123").unwrap().as_str(), "dpl_123");
    }

    #[test]
    fn test_default_config_is_five_minutes() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.max_attempts, 60);
        assert_eq!(cfg.poll_interval() * cfg.max_attempts, Duration::from_secs(300));
        assert_eq!(cfg.unknown_status, UnknownStatusPolicy::Fail);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let zero_interval = TrackerConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_interval.validate(),
            Err(TrackError::InvalidConfig(_))
        ));

        let zero_attempts = TrackerConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_attempts.validate(),
            Err(TrackError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_outcome_is_tagged_by_terminal_kind() {
        let success = TrackerOutcome::Success {
            payload: Some(serde_json::json!({ "url": "app.vercel.app" })),
        };
        let value = serde_json::to_value(&success).unwrap();
        assert_eq!(value["terminal"], "success");
        assert_eq!(value["payload"]["url"], "app.vercel.app");

        let timeout = serde_json::to_value(TrackerOutcome::Timeout { attempts: 60 }).unwrap();
        assert_eq!(timeout["terminal"], "timeout");
        assert_eq!(timeout["attempts"], 60);
    }
}
