//! Trigger loop: decides when a reconciliation pass runs.
//!
//! All producers (event watcher, resync ticker, startup, failed passes)
//! push [`Signal`]s into one bounded queue. The loop coalesces them with
//! a [`Debouncer`] and runs at most one pass at a time. Signals that
//! arrive while a pass is in flight are still drained from the queue and
//! schedule exactly one follow-up pass.

use std::sync::Arc;
use std::time::Duration;

use doko_reconcile::Debouncer;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::reconciler::Pass;

/// Why a pass was requested. Only the fact that one was requested matters
/// to the loop; the reason is kept for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Startup,
    Event,
    Resync,
    Manual,
    Retry,
}

/// What happened to a sent signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The queue was full. A pass is already guaranteed.
    Dropped,
    /// The trigger loop is gone.
    Closed,
}

impl SendOutcome {
    pub fn is_closed(self) -> bool {
        self == SendOutcome::Closed
    }
}

/// Sending half of the signal queue.
///
/// Sending never blocks. A full queue already guarantees a pass, so the
/// extra signal is dropped.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<Signal>,
}

impl SignalSender {
    /// Queue a signal without waiting.
    pub fn send(&self, signal: Signal) -> SendOutcome {
        match self.tx.try_send(signal) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                debug!(?signal, "Signal queue full, dropping signal");
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }
}

/// Create the bounded signal queue.
pub fn signal_channel(capacity: usize) -> (SignalSender, mpsc::Receiver<Signal>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SignalSender { tx }, rx)
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerStats {
    pub signals: u64,
    pub passes: u64,
    pub failures: u64,
    pub retries_queued: u64,
}

/// Serialized pass runner.
pub struct TriggerLoop {
    pass: Arc<dyn Pass>,
    signals: mpsc::Receiver<Signal>,
    retry: SignalSender,
    debouncer: Debouncer<Instant>,
    stats: TriggerStats,
}

impl TriggerLoop {
    /// `retry` must feed the same queue as `signals`.
    pub fn new(
        pass: Arc<dyn Pass>,
        signals: mpsc::Receiver<Signal>,
        retry: SignalSender,
        debounce: Duration,
    ) -> Self {
        Self {
            pass,
            signals,
            retry,
            debouncer: Debouncer::new(debounce),
            stats: TriggerStats::default(),
        }
    }

    /// Run until shutdown is signalled.
    ///
    /// A pass that has started always runs to completion before shutdown
    /// is observed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> TriggerStats {
        info!(
            debounce_ms = self.debouncer.window().as_millis() as u64,
            "Trigger loop started"
        );

        loop {
            let deadline = self.debouncer.deadline();

            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("Trigger loop shutting down");
                        break;
                    }
                }

                signal = self.signals.recv() => {
                    let Some(signal) = signal else {
                        info!("Signal queue closed, stopping trigger loop");
                        break;
                    };
                    self.record(signal);
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.debouncer.fire(Instant::now()) {
                        self.run_pass().await;
                    }
                }
            }
        }

        self.stats
    }

    fn record(&mut self, signal: Signal) {
        debug!(?signal, state = ?self.debouncer.state(), "Signal received");
        self.stats.signals += 1;
        self.debouncer.signal(Instant::now());
    }

    async fn run_pass(&mut self) {
        self.stats.passes += 1;
        let pass = self.pass.clone();
        let run = pass.run_pass();
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Some(signal) = self.signals.recv() => self.record(signal),
            }
        };

        self.debouncer.finish(Instant::now());

        if let Err(e) = result {
            self.stats.failures += 1;
            error!(error = %e, "Reconciliation pass failed");
            match self.retry.send(Signal::Retry) {
                SendOutcome::Queued => self.stats.retries_queued += 1,
                SendOutcome::Dropped => debug!("Signal queue full, pass already pending"),
                SendOutcome::Closed => warn!("Signal queue closed, retry not queued"),
            }
        }
    }
}
