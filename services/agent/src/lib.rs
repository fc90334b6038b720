//! doko agent library
//!
//! The agent runs next to a Docker daemon and a Consul agent on one host
//! and keeps the Consul service catalog in step with the labelled
//! containers running there.
//!
//! ## Architecture
//!
//! ```text
//!  Docker events ──► watcher ─┐
//!  resync ticker ─────────────┼──► signal queue ──► trigger loop ──► Reconciler pass
//!  failed pass (retry) ───────┘                     (debounce)       ├── read_desired (Docker)
//!                                                                    ├── read_actual  (Consul)
//!                                                                    ├── reconcile
//!                                                                    └── apply        (Consul)
//!  heartbeat ──► TTL check of the agent's own liveness service
//! ```
//!
//! ## Modules
//!
//! - `runtime` / `docker`: workload runtime interface and its Docker client
//! - `registry` / `consul`: service registry interface and its Consul client
//! - `readers`, `applier`, `reconciler`: one reconciliation pass
//! - `trigger`, `watcher`: when passes run
//! - `heartbeat`, `identity`: the agent's own liveness entry

pub mod applier;
pub mod config;
pub mod consul;
pub mod docker;
pub mod heartbeat;
pub mod identity;
pub mod readers;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod trigger;
pub mod watcher;

pub use config::Config;
pub use reconciler::{Pass, PassError, PassStats, Reconciler};
pub use trigger::{
    signal_channel, SendOutcome, Signal, SignalSender, TriggerLoop, TriggerStats,
};
