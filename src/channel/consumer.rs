//! Subscriber-side state machine for a progress stream.

use std::fmt;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Snapshot;
use crate::tracker::Latch;

/// What the consumer hands to its callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    Intermediate(Snapshot),
    /// Delivered at most once per stream.
    Terminal(Snapshot),
}

/// How a subscription ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    /// The terminal snapshot arrived. Its `success` flag carries the job result.
    Completed(Snapshot),
    /// The stream broke, closed early or carried garbage. The job's outcome
    /// is unknown; it is neither a success nor a failure.
    Inconclusive { reason: String },
    Cancelled,
}

impl ConsumeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConsumeOutcome::Completed(snapshot) if snapshot.success)
    }
}

#[derive(Debug, Default)]
pub struct ProgressConsumer {
    latch: Latch<ConsumeOutcome>,
    intermediates: usize,
    ignored: usize,
}

impl ProgressConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_settled(&self) -> bool {
        self.latch.is_settled()
    }

    pub fn outcome(&self) -> Option<&ConsumeOutcome> {
        self.latch.outcome()
    }

    /// Intermediate snapshots delivered so far.
    pub fn intermediates(&self) -> usize {
        self.intermediates
    }

    /// Events dropped because they arrived after settling.
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    /// Feed one raw event payload. Returns the update to deliver, if any.
    pub fn observe(&mut self, data: &str) -> Option<ProgressUpdate> {
        if self.latch.is_settled() {
            self.ignored += 1;
            debug!("Already settled, ignoring event");
            return None;
        }

        let snapshot: Snapshot = match serde_json::from_str(data) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.fail(format!("malformed snapshot: {}", e));
                return None;
            }
        };

        if snapshot.complete {
            info!(status = %snapshot.status, success = snapshot.success, "Terminal snapshot received");
            self.latch.settle(ConsumeOutcome::Completed(snapshot.clone()));
            Some(ProgressUpdate::Terminal(snapshot))
        } else {
            self.intermediates += 1;
            Some(ProgressUpdate::Intermediate(snapshot))
        }
    }

    /// Record a transport failure. No-op once settled.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.latch.settle(ConsumeOutcome::Inconclusive {
            reason: reason.clone(),
        }) {
            warn!(%reason, "Progress stream ended inconclusively");
        }
    }

    /// Read `events` until settled, the stream ends, or `cancel` fires.
    ///
    /// `on_update` is never called after this returns, and never more than
    /// once with a [`ProgressUpdate::Terminal`].
    pub async fn consume<S, E, C>(
        mut self,
        events: S,
        cancel: &CancellationToken,
        mut on_update: C,
    ) -> ConsumeOutcome
    where
        S: Stream<Item = Result<String, E>>,
        E: fmt::Display,
        C: FnMut(ProgressUpdate),
    {
        let mut events = std::pin::pin!(events);

        while !self.latch.is_settled() {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.latch.settle(ConsumeOutcome::Cancelled);
                    break;
                }
                next = events.next() => next,
            };

            match next {
                Some(Ok(data)) => {
                    if let Some(update) = self.observe(&data) {
                        on_update(update);
                    }
                }
                Some(Err(e)) => self.fail(format!("transport error: {}", e)),
                None => self.fail("stream closed before a terminal event"),
            }
        }

        self.latch
            .into_outcome()
            .unwrap_or_else(|| ConsumeOutcome::Inconclusive {
                reason: "consumer stopped without an outcome".to_string(),
            })
    }
}
