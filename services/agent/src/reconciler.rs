//! One reconciliation pass.
//!
//! A pass reads the desired state from the runtime and the actual state
//! from the registry, diffs them, and applies the difference. Passes are
//! stateless: nothing is carried from one pass to the next, so a missed
//! event is repaired by whichever pass runs after it.

use std::sync::Arc;

use async_trait::async_trait;
use doko_reconcile::reconcile;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::applier::{apply, ApplyError, ApplyStats};
use crate::readers::{read_actual, read_desired};
use crate::registry::{Registry, RegistryError};
use crate::runtime::{RuntimeError, WorkloadRuntime};

/// Errors that fail a pass.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("reading workloads: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("reading registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("applying changes: {0}")]
    Apply(#[from] ApplyError),
}

/// Summary of a successful pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub desired: usize,
    pub actual: usize,
    pub operations: usize,
    pub applied: ApplyStats,
}

/// Something the trigger loop can run.
#[async_trait]
pub trait Pass: Send + Sync {
    async fn run_pass(&self) -> Result<PassStats, PassError>;
}

/// Reconciles the registry against the runtime.
pub struct Reconciler {
    runtime: Arc<dyn WorkloadRuntime>,
    registry: Arc<dyn Registry>,
    check_addr: String,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn WorkloadRuntime>,
        registry: Arc<dyn Registry>,
        check_addr: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            registry,
            check_addr: check_addr.into(),
        }
    }
}

#[async_trait]
impl Pass for Reconciler {
    #[instrument(skip(self))]
    async fn run_pass(&self) -> Result<PassStats, PassError> {
        let desired = read_desired(self.runtime.as_ref()).await?;
        let actual = read_actual(self.registry.as_ref()).await?;

        let ops = reconcile(&desired, &actual);
        debug!(operations = ops.len(), "Computed operations");

        let applied = apply(self.registry.as_ref(), &self.check_addr, &ops).await?;

        let stats = PassStats {
            desired: desired.len(),
            actual: actual.len(),
            operations: ops.len(),
            applied,
        };

        if ops.is_empty() {
            debug!(desired = stats.desired, "Registry already in sync");
        } else {
            info!(
                desired = stats.desired,
                actual = stats.actual,
                registered = applied.registered,
                deregistered = applied.deregistered,
                "Reconciliation pass complete"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use doko_reconcile::Workload;

    use super::*;
    use crate::registry::{FakeRegistry, RegisteredService};
    use crate::runtime::FakeRuntime;

    fn web(id: &str) -> Workload {
        Workload {
            id: id.to_string(),
            labels: [("doko.name", "web"), ("doko.port", "8080")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            network_mode: "host".to_string(),
            ports: vec![],
        }
    }

    #[tokio::test]
    async fn test_pass_registers_and_removes() {
        let runtime = Arc::new(FakeRuntime::new());
        let registry = Arc::new(FakeRegistry::new());
        runtime.set_workloads(vec![web("c1")]).await;
        registry
            .insert_service(RegisteredService {
                id: "doko-svc-gone".to_string(),
                name: "web".to_string(),
                ..Default::default()
            })
            .await;

        let reconciler = Reconciler::new(runtime.clone(), registry.clone(), "127.0.0.1");
        let stats = reconciler.run_pass().await.unwrap();

        assert_eq!(stats.operations, 2);
        assert_eq!(stats.applied.registered, 1);
        assert_eq!(stats.applied.deregistered, 1);

        let services = registry.services().await;
        assert!(services.contains_key("doko-svc-c1"));
        assert!(!services.contains_key("doko-svc-gone"));
    }

    #[tokio::test]
    async fn test_pass_fails_when_runtime_unreachable() {
        let runtime = Arc::new(FakeRuntime::new());
        let registry = Arc::new(FakeRegistry::new());
        runtime.fail_list(true);

        let reconciler = Reconciler::new(runtime, registry.clone(), "127.0.0.1");
        let err = reconciler.run_pass().await.unwrap_err();
        assert!(matches!(err, PassError::Runtime(_)));
        assert!(registry.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_pass_fails_when_registry_unreachable() {
        let runtime = Arc::new(FakeRuntime::new());
        let registry = Arc::new(FakeRegistry::new());
        runtime.set_workloads(vec![web("c1")]).await;
        registry.fail_list(true);

        let reconciler = Reconciler::new(runtime, registry.clone(), "127.0.0.1");
        let err = reconciler.run_pass().await.unwrap_err();
        assert!(matches!(err, PassError::Registry(_)));
        assert!(registry.calls().await.is_empty());
    }
}
