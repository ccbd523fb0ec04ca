//! Poll variant: ask for the job status until it settles.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    JobId, JobStatus, StatusClass, StatusReport, TrackError, TrackerConfig, TrackerOutcome,
    UnknownStatusPolicy,
};

/// Capability that retrieves the current status of a job from its provider.
///
/// Implementations should fail (not return a status) when the check itself
/// could not be performed; the tracker surfaces such errors immediately.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    type Status: JobStatus;

    async fn fetch_status(&self, job: &JobId) -> anyhow::Result<StatusReport<Self::Status>>;
}

/// Track `job` until it reaches a terminal status or the attempt bound.
///
/// The first check happens immediately. Every check that observes a
/// pending status is followed by exactly one `poll_interval` delay before
/// the next one. A success observed on the last allowed attempt is still a
/// success. Cancelling `cancel` stops the loop before its next fetch or
/// during its delay; no outcome is produced in that case.
pub async fn track<F>(
    job: &JobId,
    config: &TrackerConfig,
    fetcher: &F,
    cancel: &CancellationToken,
) -> Result<TrackerOutcome, TrackError>
where
    F: StatusFetcher + ?Sized,
{
    config.validate()?;
    let interval = config.poll_interval();
    let mut attempts: u32 = 0;

    loop {
        let attempt = attempts + 1;
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(job, attempts)),
            result = fetcher.fetch_status(job) => result.map_err(|error| {
                warn!(job = %job, attempt, "Status check failed: {:#}", error);
                TrackError::Fetch { job: job.clone(), attempt, error }
            })?,
        };

        let status = report.status;
        debug!(job = %job, attempt, status = %status, "Observed job status");

        match status.class() {
            StatusClass::Succeeded => {
                info!(job = %job, attempt, status = %status, "Job succeeded");
                return Ok(TrackerOutcome::Success {
                    payload: report.payload,
                });
            }
            StatusClass::Failed => {
                warn!(job = %job, attempt, status = %status, "Job failed");
                return Ok(TrackerOutcome::Failure {
                    status: status.to_string(),
                    reason: report.payload,
                });
            }
            StatusClass::Unrecognized if config.unknown_status == UnknownStatusPolicy::Fail => {
                warn!(job = %job, attempt, status = %status, "Unrecognized job status, giving up");
                return Ok(TrackerOutcome::Failure {
                    status: status.to_string(),
                    reason: Some(serde_json::json!(format!("unrecognized status '{}'", status))),
                });
            }
            StatusClass::Pending | StatusClass::Unrecognized => {}
        }

        attempts = attempt;
        if attempts >= config.max_attempts {
            warn!(job = %job, attempts, last_status = %status, "Attempt budget exhausted");
            return Ok(TrackerOutcome::Timeout { attempts });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(job, attempts)),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn cancelled(job: &JobId, attempts: u32) -> TrackError {
    info!(job = %job, attempts, "Tracking cancelled");
    TrackError::Cancelled { job: job.clone() }
}
