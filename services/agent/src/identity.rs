//! Persisted agent identity and its liveness registration.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use doko_id::InstanceId;
use doko_reconcile::format_duration;
use tracing::{info, warn};

use crate::registry::{CheckRegistration, Registry, ServiceRegistration};

/// Service name of the agent's own liveness entry.
pub const INSTANCE_SERVICE_NAME: &str = "doko";

/// Name of the agent's TTL check.
pub const INSTANCE_CHECK_NAME: &str = "(doko) Internal Alive Check";

/// TTL of the agent's check. Must exceed the heartbeat interval.
pub const INSTANCE_CHECK_TTL: Duration = Duration::from_secs(10);

/// Reads the instance ID from `path`, generating and persisting a new one
/// when the file is missing or empty.
pub async fn ensure_instance_id(path: &Path) -> Result<InstanceId> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) if !contents.trim().is_empty() => {
            let id = InstanceId::parse(&contents)
                .with_context(|| format!("invalid instance id in {}", path.display()))?;
            info!(instance_id = %id, path = %path.display(), "Loaded instance id");
            return Ok(id);
        }
        Ok(_) => warn!(path = %path.display(), "Instance id file is empty, generating a new id"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    }

    let id = InstanceId::generate();
    tokio::fs::write(path, id.as_str())
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(instance_id = %id, path = %path.display(), "Generated instance id");
    Ok(id)
}

/// Registers the agent's liveness service and its TTL check.
pub async fn register_instance(registry: &dyn Registry, id: &InstanceId) -> Result<()> {
    let service_id = id.service_id();

    registry
        .register_service(&ServiceRegistration {
            id: service_id.to_string(),
            name: INSTANCE_SERVICE_NAME.to_string(),
            ..Default::default()
        })
        .await
        .context("failed to register instance service")?;

    registry
        .register_check(&CheckRegistration {
            id: id.check_id().to_string(),
            name: INSTANCE_CHECK_NAME.to_string(),
            service_id: service_id.to_string(),
            ttl: format_duration(INSTANCE_CHECK_TTL),
        })
        .await
        .context("failed to register instance check")?;

    info!(service_id = %service_id, "Registered instance");
    Ok(())
}

/// Removes the agent's liveness check and service.
pub async fn deregister_instance(registry: &dyn Registry, id: &InstanceId) -> Result<()> {
    registry
        .deregister_check(id.check_id().as_str())
        .await
        .context("failed to deregister instance check")?;
    registry
        .deregister_service(id.service_id().as_str())
        .await
        .context("failed to deregister instance service")?;

    info!(service_id = %id.service_id(), "Deregistered instance");
    Ok(())
}
