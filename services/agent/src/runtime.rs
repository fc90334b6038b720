//! Workload runtime interface and an in-memory fake.
//!
//! The runtime interface abstracts the two things the engine needs from
//! the container runtime:
//! - Listing running workloads
//! - Subscribing to workload lifecycle events
//!
//! `DockerClient` implements it against the Docker Engine API;
//! `FakeRuntime` is provided for testing and development.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use doko_reconcile::Workload;
use futures_util::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Errors from the workload runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("runtime API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl From<hyper::http::Error> for RuntimeError {
    fn from(err: hyper::http::Error) -> Self {
        RuntimeError::Request(err.to_string())
    }
}

/// Which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub scope: String,
    pub kind: String,
    pub actions: Vec<String>,
}

impl EventFilter {
    /// Local container start/die events: the ones that change the desired state.
    pub fn container_lifecycle() -> Self {
        Self {
            scope: "local".to_string(),
            kind: "container".to_string(),
            actions: vec!["start".to_string(), "die".to_string()],
        }
    }
}

/// A workload lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEvent {
    /// Workload (container) ID.
    pub id: String,

    /// Event action, e.g. `start` or `die`.
    pub action: String,
}

/// Stream of lifecycle events. Ends on EOF; an `Err` item means the stream
/// is broken and should be resubscribed.
pub type EventStream = BoxStream<'static, Result<WorkloadEvent, RuntimeError>>;

/// Workload runtime interface.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// List running workloads.
    async fn list_workloads(&self) -> Result<Vec<Workload>, RuntimeError>;

    /// Subscribe to lifecycle events matching `filter`.
    async fn subscribe_events(&self, filter: &EventFilter) -> Result<EventStream, RuntimeError>;
}

/// In-memory runtime for testing and development.
pub struct FakeRuntime {
    workloads: Mutex<Vec<Workload>>,
    events: Mutex<Option<mpsc::Sender<Result<WorkloadEvent, RuntimeError>>>>,
    subscriptions: AtomicUsize,
    fail_list: AtomicBool,
}

impl FakeRuntime {
    /// Create an empty fake runtime.
    pub fn new() -> Self {
        Self {
            workloads: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            subscriptions: AtomicUsize::new(0),
            fail_list: AtomicBool::new(false),
        }
    }

    /// Replace the set of running workloads.
    pub async fn set_workloads(&self, workloads: Vec<Workload>) {
        *self.workloads.lock().await = workloads;
    }

    /// Make `list_workloads` fail until reset.
    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Number of `subscribe_events` calls so far.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Push an event to the current subscriber. Returns false if nobody listens.
    pub async fn emit(&self, event: WorkloadEvent) -> bool {
        match self.events.lock().await.as_ref() {
            Some(tx) => tx.send(Ok(event)).await.is_ok(),
            None => false,
        }
    }

    /// Break the current subscription with an error item.
    pub async fn break_stream(&self, message: &str) {
        if let Some(tx) = self.events.lock().await.take() {
            let _ = tx
                .send(Err(RuntimeError::Request(message.to_string())))
                .await;
        }
    }

    /// End the current subscription cleanly (EOF).
    pub async fn close_stream(&self) {
        self.events.lock().await.take();
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadRuntime for FakeRuntime {
    async fn list_workloads(&self) -> Result<Vec<Workload>, RuntimeError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api {
                status: 500,
                message: "fake runtime configured to fail".to_string(),
            });
        }
        Ok(self.workloads.lock().await.clone())
    }

    async fn subscribe_events(&self, filter: &EventFilter) -> Result<EventStream, RuntimeError> {
        let n = self.subscriptions.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(subscription = n, actions = ?filter.actions, "[FAKE] Subscribing to events");

        let (tx, rx) = mpsc::channel(16);
        *self.events.lock().await = Some(tx);
        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_runtime_lists_workloads() {
        let runtime = FakeRuntime::new();
        runtime
            .set_workloads(vec![Workload {
                id: "abc".to_string(),
                ..Default::default()
            }])
            .await;

        let listed = runtime.list_workloads().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "abc");
    }

    #[tokio::test]
    async fn test_fake_runtime_failing() {
        let runtime = FakeRuntime::new();
        runtime.fail_list(true);
        assert!(runtime.list_workloads().await.is_err());
    }

    #[tokio::test]
    async fn test_fake_runtime_stream() {
        let runtime = FakeRuntime::new();
        let mut stream = runtime
            .subscribe_events(&EventFilter::container_lifecycle())
            .await
            .unwrap();

        assert!(
            runtime
                .emit(WorkloadEvent {
                    id: "abc".to_string(),
                    action: "start".to_string(),
                })
                .await
        );
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.action, "start");

        runtime.close_stream().await;
        assert!(stream.next().await.is_none());
        assert_eq!(runtime.subscription_count(), 1);
    }
}
