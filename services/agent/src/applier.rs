//! Executes reconciliation operations against the registry.
//!
//! Every operation is attempted even when an earlier one fails. Failures
//! are logged with the service ID they touched and returned together, so
//! one broken entry cannot starve the rest of the pass.

use std::fmt;

use doko_id::ServiceId;
use doko_reconcile::Operation;
use thiserror::Error;
use tracing::{error, info};

use crate::registry::{Registry, RegistryError, ServiceRegistration};

/// Counts for one apply run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub registered: usize,
    pub deregistered: usize,
    pub failed: usize,
}

impl ApplyStats {
    /// Number of mutations that went through.
    pub fn mutations(&self) -> usize {
        self.registered + self.deregistered
    }
}

/// One operation that the registry rejected.
#[derive(Debug)]
pub struct OperationFailure {
    pub id: ServiceId,
    pub kind: &'static str,
    pub source: RegistryError,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.id, self.source)
    }
}

/// Apply errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(
        "{count} of {attempted} operations failed; first: {first}",
        count = failures.len(),
        first = first_failure(failures)
    )]
    Partial {
        attempted: usize,
        stats: ApplyStats,
        failures: Vec<OperationFailure>,
    },
}

fn first_failure(failures: &[OperationFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl ApplyError {
    /// Failed operations, in the order they were attempted.
    pub fn failures(&self) -> &[OperationFailure] {
        match self {
            ApplyError::Partial { failures, .. } => failures,
        }
    }

    /// Counts for the operations that did go through.
    pub fn stats(&self) -> ApplyStats {
        match self {
            ApplyError::Partial { stats, .. } => *stats,
        }
    }
}

/// Applies `ops` in order. Checks in registrations target `check_addr`.
pub async fn apply(
    registry: &dyn Registry,
    check_addr: &str,
    ops: &[Operation],
) -> Result<ApplyStats, ApplyError> {
    let mut stats = ApplyStats::default();
    let mut failures = Vec::new();

    for op in ops {
        let result = match op {
            Operation::Deregister { id } => registry.deregister_service(id.as_str()).await,
            Operation::Register(entry) => {
                let registration = ServiceRegistration::from_entry(entry, check_addr);
                registry.register_service(&registration).await
            }
        };

        match result {
            Ok(()) => {
                match op {
                    Operation::Deregister { .. } => stats.deregistered += 1,
                    Operation::Register(_) => stats.registered += 1,
                }
                info!(service_id = %op.id(), op = op.kind(), "Registry updated");
            }
            Err(e) => {
                error!(
                    service_id = %op.id(),
                    op = op.kind(),
                    error = %e,
                    "Registry update failed"
                );
                stats.failed += 1;
                failures.push(OperationFailure {
                    id: op.id().clone(),
                    kind: op.kind(),
                    source: e,
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(stats)
    } else {
        Err(ApplyError::Partial {
            attempted: ops.len(),
            stats,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use doko_reconcile::ServiceEntry;

    use super::*;
    use crate::registry::{FakeRegistry, RegistryCall};

    fn entry(suffix: &str) -> ServiceEntry {
        ServiceEntry {
            id: ServiceId::from_suffix(suffix).unwrap(),
            name: "web".to_string(),
            port: 8080,
            tags: vec![],
            meta: BTreeMap::new(),
            check: None,
        }
    }

    fn deregister(suffix: &str) -> Operation {
        Operation::Deregister {
            id: ServiceId::from_suffix(suffix).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_apply_runs_operations_in_order() {
        let registry = FakeRegistry::new();
        let ops = vec![
            deregister("old"),
            Operation::Register(entry("a")),
            Operation::Register(entry("b")),
        ];

        let stats = apply(&registry, "127.0.0.1", &ops).await.unwrap();
        assert_eq!(
            stats,
            ApplyStats {
                registered: 2,
                deregistered: 1,
                failed: 0
            }
        );
        assert_eq!(
            registry.calls().await,
            vec![
                RegistryCall::DeregisterService("doko-svc-old".to_string()),
                RegistryCall::RegisterService("doko-svc-a".to_string()),
                RegistryCall::RegisterService("doko-svc-b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_continues_past_failures() {
        let registry = FakeRegistry::new();
        registry.fail_id("doko-svc-a").await;

        let ops = vec![
            Operation::Register(entry("a")),
            Operation::Register(entry("b")),
        ];
        let err = apply(&registry, "127.0.0.1", &ops).await.unwrap_err();

        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].id.as_str(), "doko-svc-a");
        assert_eq!(err.failures()[0].kind, "register");
        assert_eq!(err.stats().registered, 1);
        assert!(registry.services().await.contains_key("doko-svc-b"));
        assert!(err.to_string().starts_with("1 of 2 operations failed"));
    }

    #[tokio::test]
    async fn test_apply_nothing() {
        let registry = FakeRegistry::new();
        let stats = apply(&registry, "127.0.0.1", &[]).await.unwrap();
        assert_eq!(stats.mutations(), 0);
        assert!(registry.calls().await.is_empty());
    }
}
