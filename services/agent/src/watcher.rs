//! Signal producers: the runtime event watcher and the resync ticker.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::runtime::{EventFilter, WorkloadRuntime};
use crate::trigger::{Signal, SignalSender};

/// Turns runtime lifecycle events into signals.
///
/// When the subscription fails or its stream ends, the watcher waits
/// `resubscribe_delay` and subscribes again, indefinitely. Returns the
/// number of subscriptions opened.
pub async fn watch_events(
    runtime: Arc<dyn WorkloadRuntime>,
    signals: SignalSender,
    resubscribe_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let filter = EventFilter::container_lifecycle();
    let mut subscriptions = 0u64;

    info!(actions = ?filter.actions, "Starting event watcher");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match runtime.subscribe_events(&filter).await {
            Ok(mut stream) => {
                subscriptions += 1;
                debug!(subscriptions, "Subscribed to runtime events");

                loop {
                    tokio::select! {
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                debug!(container_id = %event.id, action = %event.action, "Runtime event");
                                if signals.send(Signal::Event).is_closed() {
                                    info!("Signal queue closed, stopping event watcher");
                                    return subscriptions;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Event stream failed");
                                break;
                            }
                            None => {
                                warn!("Event stream ended");
                                break;
                            }
                        },
                        res = shutdown.changed() => {
                            if res.is_err() || *shutdown.borrow() {
                                info!("Event watcher shutting down");
                                return subscriptions;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to subscribe to runtime events");
            }
        }

        tokio::select! {
            _ = sleep(resubscribe_delay) => {
                debug!(delay_ms = resubscribe_delay.as_millis() as u64, "Resubscribing to runtime events");
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    info!("Event watcher shutting down");
                    break;
                }
            }
        }
    }

    subscriptions
}

/// Emits a resync signal every `period`, starting one period from now.
pub async fn run_resync_ticker(
    signals: SignalSender,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = period.as_secs(), "Starting resync ticker");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!("Resync tick");
                if signals.send(Signal::Resync).is_closed() {
                    break;
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    info!("Resync ticker shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::signal_channel;

    #[tokio::test(start_paused = true)]
    async fn test_ticker_waits_one_period() {
        let (tx, mut rx) = signal_channel(10);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_resync_ticker(tx, Duration::from_secs(30), shutdown_rx));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().ok(), Some(Signal::Resync));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
