//! State readers: desired state from the runtime, actual state from the registry.

use std::collections::HashMap;

use doko_id::{shorten_container_id, ServiceId};
use doko_reconcile::{
    interpret, parse_duration, path_and_query, ActualEntry, ActualState, DesiredState,
    HealthCheck,
};
use tracing::{debug, warn};

use crate::registry::{RegisteredCheck, Registry, RegistryError};
use crate::runtime::{RuntimeError, WorkloadRuntime};

/// Lists running workloads and derives their desired entries.
///
/// A workload with unusable labels is logged and left out; it never fails
/// the read. Only a runtime failure does.
pub async fn read_desired(runtime: &dyn WorkloadRuntime) -> Result<DesiredState, RuntimeError> {
    let workloads = runtime.list_workloads().await?;
    let mut desired = DesiredState::new();

    for workload in &workloads {
        match interpret(workload) {
            Ok(Some(entry)) => {
                if let Some(previous) = desired.insert(entry.id.clone(), entry) {
                    warn!(
                        service_id = %previous.id,
                        container_id = %shorten_container_id(&workload.id),
                        "Two containers map to the same service id, keeping the last one"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    container_id = %shorten_container_id(&workload.id),
                    error = %e,
                    "Skipping container with invalid labels"
                );
            }
        }
    }

    debug!(
        workloads = workloads.len(),
        desired = desired.len(),
        "Read desired state"
    );
    Ok(desired)
}

/// Lists registry services and checks and keeps the doko-owned ones.
///
/// Ownership is decided by the `doko-svc-` ID prefix alone; services
/// without it are never looked at.
pub async fn read_actual(registry: &dyn Registry) -> Result<ActualState, RegistryError> {
    let services = registry.list_services().await?;
    let checks = registry.list_checks().await?;

    let mut checks_by_service: HashMap<&str, Vec<&RegisteredCheck>> = HashMap::new();
    for check in checks.values() {
        checks_by_service
            .entry(check.service_id.as_str())
            .or_default()
            .push(check);
    }

    let mut actual = ActualState::new();
    for service in services.values() {
        if !ServiceId::is_prefixed(&service.id) {
            continue;
        }
        let id = match ServiceId::parse(&service.id) {
            Ok(id) => id,
            Err(e) => {
                warn!(service_id = %service.id, error = %e, "Ignoring malformed managed service id");
                continue;
            }
        };

        let check = checks_by_service
            .get_mut(service.id.as_str())
            .and_then(|checks| {
                checks.sort_by(|a, b| a.id.cmp(&b.id));
                checks.first().copied()
            })
            .and_then(to_health_check);

        actual.insert(
            id.clone(),
            ActualEntry {
                id,
                name: service.name.clone(),
                port: service.port,
                tags: service.tags.clone(),
                meta: service.meta.clone(),
                check,
            },
        );
    }

    debug!(
        services = services.len(),
        managed = actual.len(),
        "Read actual state"
    );
    Ok(actual)
}

/// Maps a registry check back onto the check variant it was registered from.
///
/// An interval or timeout that cannot be read back becomes zero, which
/// never equals a desired value and so forces re-registration.
fn to_health_check(check: &RegisteredCheck) -> Option<HealthCheck> {
    let duration = |raw: &Option<String>| {
        raw.as_deref()
            .and_then(|s| parse_duration(s).ok())
            .unwrap_or_default()
    };
    let interval = duration(&check.interval);
    let timeout = duration(&check.timeout);

    match check.kind.as_str() {
        "http" => {
            let path = check
                .http
                .as_deref()
                .map(http_check_path)
                .unwrap_or_default();
            Some(HealthCheck::Http {
                path,
                interval,
                timeout,
            })
        }
        "grpc" => Some(HealthCheck::Grpc { interval, timeout }),
        _ => None,
    }
}

/// Path (and query) of an HTTP check target URL.
fn http_check_path(target: &str) -> String {
    match reqwest::Url::parse(target) {
        Ok(url) => path_and_query(&url),
        Err(_) => target.to_string(),
    }
}
