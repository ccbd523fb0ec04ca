//! Registry of in-flight trackers, keyed by job.
//!
//! Two trackers for the same job would double the provider call rate and
//! race on the outcome, so the registry refuses a second one while a lease
//! for that job is held. Leases release on drop, whichever way tracking ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::poll::{self, StatusFetcher};
use super::{JobId, TrackError, TrackerConfig, TrackerOutcome};

type ActiveMap = HashMap<JobId, DateTime<Utc>>;

/// A job currently being tracked.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTracker {
    pub job: JobId,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackerRegistry {
    active: Arc<Mutex<ActiveMap>>,
}

/// Exclusive right to track one job. Released when dropped.
#[derive(Debug)]
pub struct TrackerLease {
    job: JobId,
    active: Arc<Mutex<ActiveMap>>,
}

impl TrackerLease {
    pub fn job(&self) -> &JobId {
        &self.job
    }
}

impl Drop for TrackerLease {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.job);
        debug!(job = %self.job, "Tracker lease released");
    }
}

fn lock(active: &Mutex<ActiveMap>) -> MutexGuard<'_, ActiveMap> {
    // The map stays consistent even if a holder panicked mid-operation.
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, job: &JobId) -> Result<TrackerLease, TrackError> {
        let mut active = lock(&self.active);
        if active.contains_key(job) {
            return Err(TrackError::AlreadyTracked { job: job.clone() });
        }
        active.insert(job.clone(), Utc::now());
        debug!(job = %job, "Tracker lease acquired");
        Ok(TrackerLease {
            job: job.clone(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_tracked(&self, job: &JobId) -> bool {
        lock(&self.active).contains_key(job)
    }

    /// Jobs currently tracked, oldest first.
    pub fn active(&self) -> Vec<ActiveTracker> {
        let mut list: Vec<ActiveTracker> = lock(&self.active)
            .iter()
            .map(|(job, since)| ActiveTracker {
                job: job.clone(),
                since: *since,
            })
            .collect();
        list.sort_by(|a, b| a.since.cmp(&b.since));
        list
    }

    /// Acquire a lease for `job` and poll it to completion.
    pub async fn track<F>(
        &self,
        job: &JobId,
        config: &TrackerConfig,
        fetcher: &F,
        cancel: &CancellationToken,
    ) -> Result<TrackerOutcome, TrackError>
    where
        F: StatusFetcher + ?Sized,
    {
        let _lease = self.acquire(job)?;
        poll::track(job, config, fetcher, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::poll::tests::{ScriptedFetcher, TestStatus};
    use crate::tracker::UnknownStatusPolicy;
    use std::time::Duration;

    fn job(id: &str) -> JobId {
        JobId::new(id).unwrap()
    }

    #[test]
    fn test_second_lease_for_same_job_is_refused() {
        let registry = TrackerRegistry::new();
        let lease = registry.acquire(&job("dpl_1")).unwrap();
        assert_eq!(lease.job().as_str(), "dpl_1");

        assert!(matches!(
            registry.acquire(&job("dpl_1")),
            Err(TrackError::AlreadyTracked { .. })
        ));
        // Other jobs are unaffected.
        let _other = registry.acquire(&job("dpl_2")).unwrap();
        assert_eq!(registry.active().len(), 2);
    }

    #[test]
    fn test_dropping_lease_releases_job() {
        let registry = TrackerRegistry::new();
        {
            let _lease = registry.acquire(&job("dpl_1")).unwrap();
            assert!(registry.is_tracked(&job("dpl_1")));
        }
        assert!(!registry.is_tracked(&job("dpl_1")));
        assert!(registry.acquire(&job("dpl_1")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_releases_on_every_exit_path() {
        let registry = TrackerRegistry::new();
        let config = TrackerConfig {
            poll_interval_ms: 1_000,
            max_attempts: 3,
            unknown_status: UnknownStatusPolicy::Fail,
        };

        let ok = ScriptedFetcher::statuses(vec![TestStatus::Queued, TestStatus::Ready]);
        let outcome = registry
            .track(&job("dpl_ok"), &config, &ok, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());

        let broken = ScriptedFetcher::new(vec![Err("503 from provider".to_string())]);
        let err = registry
            .track(&job("dpl_err"), &config, &broken, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::Fetch { .. }));

        assert!(registry.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_tracker_for_same_job_is_refused() {
        let registry = TrackerRegistry::new();
        let config = TrackerConfig::default();
        let fetcher = ScriptedFetcher::statuses(vec![TestStatus::Building]);
        let cancel = CancellationToken::new();

        let first = {
            let registry = registry.clone();
            let fetcher = fetcher.clone();
            let cancel = cancel.clone();
            let config = config.clone();
            tokio::spawn(async move {
                registry
                    .track(&job("dpl_1"), &config, &fetcher, &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = registry
            .track(&job("dpl_1"), &config, &fetcher, &cancel)
            .await;
        assert!(matches!(second, Err(TrackError::AlreadyTracked { .. })));

        cancel.cancel();
        let first = first.await.unwrap();
        assert!(matches!(first, Err(TrackError::Cancelled { .. })));
        assert!(!registry.is_tracked(&job("dpl_1")));
        // Only the first tracker ever reached the provider.
        assert_eq!(fetcher.calls(), 1);
    }
}
