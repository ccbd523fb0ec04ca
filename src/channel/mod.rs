//! Push variant: a one-way stream of progress snapshots for a long-running job.
//!
//! The producer side ([`ProgressPublisher`]) emits complete snapshots and
//! ends with exactly one terminal snapshot (`complete: true`); finishing
//! consumes the publisher, which closes the stream. The consumer side
//! ([`consumer::ProgressConsumer`]) tolerates duplicates and late events.

pub mod consumer;
pub mod sse;

use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub use self::consumer::{ConsumeOutcome, ProgressConsumer, ProgressUpdate};

/// Default number of snapshots buffered between producer and subscriber.
pub const DEFAULT_CAPACITY: usize = 16;

/// A self-contained view of a job's progress. Never a diff: the latest
/// snapshot alone reconstructs current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub success: bool,
    /// Job-specific fields, flattened into the top-level JSON object.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Snapshot {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            complete: false,
            success: false,
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

#[derive(Debug, Error)]
#[error("progress channel '{key}' has no subscriber")]
pub struct ChannelClosed {
    pub key: String,
}

/// Open a progress channel for the job identified by `key`.
pub fn channel(key: impl Into<String>, capacity: usize) -> (ProgressPublisher, ProgressStream) {
    let key = key.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressPublisher {
            key: key.clone(),
            tx,
        },
        ProgressStream { key, rx },
    )
}

/// Producer half. Dropping it without [`ProgressPublisher::finish`] closes
/// the stream with no terminal event, which subscribers read as inconclusive.
#[derive(Debug)]
pub struct ProgressPublisher {
    key: String,
    tx: mpsc::Sender<Snapshot>,
}

impl ProgressPublisher {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once the subscriber went away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Emit an intermediate snapshot.
    pub async fn publish(&self, mut snapshot: Snapshot) -> Result<(), ChannelClosed> {
        snapshot.complete = false;
        self.send(snapshot).await
    }

    /// Emit the terminal snapshot and close the stream.
    pub async fn finish(self, mut snapshot: Snapshot) -> Result<(), ChannelClosed> {
        snapshot.complete = true;
        debug!(key = %self.key, status = %snapshot.status, success = snapshot.success, "Publishing terminal snapshot");
        self.send(snapshot).await
    }

    async fn send(&self, snapshot: Snapshot) -> Result<(), ChannelClosed> {
        self.tx.send(snapshot).await.map_err(|_| ChannelClosed {
            key: self.key.clone(),
        })
    }
}

/// Subscriber half, as handed to a transport (the SSE route).
#[derive(Debug)]
pub struct ProgressStream {
    key: String,
    rx: mpsc::Receiver<Snapshot>,
}

impl ProgressStream {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = Snapshot> + Send + 'static {
        futures::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|snapshot| (snapshot, rx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_finish_marks_complete_and_closes() {
        let (publisher, mut stream) = channel("acme/site", 4);
        publisher
            .publish(Snapshot::new("BUILDING"))
            .await
            .unwrap();
        publisher
            .finish(Snapshot::new("READY").with_success(true))
            .await
            .unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.status, "BUILDING");
        assert!(!first.complete);

        let last = stream.next().await.unwrap();
        assert!(last.complete);
        assert!(last.success);

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_never_marks_complete() {
        let (publisher, stream) = channel("acme/site", 4);
        let mut sneaky = Snapshot::new("BUILDING");
        sneaky.complete = true;
        publisher.publish(sneaky).await.unwrap();
        drop(publisher);

        let events: Vec<Snapshot> = stream.into_stream().collect().await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].complete);
    }

    #[tokio::test]
    async fn test_publish_after_subscriber_left_errors() {
        let (publisher, stream) = channel("acme/site", 4);
        drop(stream);
        assert!(publisher.is_closed());
        let err = publisher.publish(Snapshot::new("BUILDING")).await.unwrap_err();
        assert_eq!(err.key, "acme/site");
    }

    #[test]
    fn test_snapshot_fields_are_flattened() {
        let snapshot = Snapshot::new("COMPLETE")
            .with_success(true)
            .with("missingConfig", false);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["status"], "COMPLETE");
        assert_eq!(value["missingConfig"], false);

        let parsed: Snapshot =
            serde_json::from_str(r#"{"status":"BUILDING","progress":40}"#).unwrap();
        assert!(!parsed.complete);
        assert!(!parsed.success);
        assert_eq!(parsed.field("progress"), Some(&serde_json::json!(40)));
    }
}
