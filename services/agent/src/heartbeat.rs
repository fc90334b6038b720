//! Heartbeat loop keeping the agent's own TTL check passing.
//!
//! The agent registers a liveness service with a TTL check at startup.
//! This loop refreshes that check so the registry can tell a live agent
//! from a dead one. Failures are logged and never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use doko_id::InstanceCheckId;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::registry::{Registry, TtlStatus};

/// Output attached to every heartbeat.
pub const HEARTBEAT_OUTPUT: &str = "RUNNING";

/// Run the heartbeat loop until shutdown.
pub async fn run_heartbeat_loop(
    registry: Arc<dyn Registry>,
    check_id: InstanceCheckId,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        check_id = %check_id,
        interval_secs = interval.as_secs(),
        "Starting heartbeat loop"
    );

    let mut consecutive_failures = 0u32;
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                match registry
                    .update_ttl(check_id.as_str(), TtlStatus::Passing, HEARTBEAT_OUTPUT)
                    .await
                {
                    Ok(()) => {
                        consecutive_failures = 0;
                        debug!(check_id = %check_id, "Heartbeat sent");
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures <= 3 {
                            warn!(
                                check_id = %check_id,
                                error = %e,
                                consecutive_failures,
                                "Heartbeat failed"
                            );
                        } else {
                            error!(
                                check_id = %check_id,
                                error = %e,
                                consecutive_failures,
                                "Heartbeat failed repeatedly"
                            );
                        }
                    }
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    info!("Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use doko_id::InstanceId;

    use super::*;
    use crate::registry::{FakeRegistry, RegistryCall};

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_survives_failures() {
        let registry = Arc::new(FakeRegistry::new());
        let check_id = InstanceId::parse("abc123").unwrap().check_id();
        registry.fail_id(check_id.as_str()).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_heartbeat_loop(
            registry.clone(),
            check_id.clone(),
            Duration::from_secs(5),
            shutdown_rx,
        ));

        // ticks at 0s, 5s, 10s
        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let calls = registry.calls().await;
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| *c
            == RegistryCall::UpdateTtl(check_id.to_string(), TtlStatus::Passing)));
    }
}
