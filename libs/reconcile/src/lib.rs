//! Reconciliation primitives for doko.
//!
//! This library holds the pure half of the engine that keeps a service
//! registry in step with the containers running on one host:
//!
//! - **Desired state**: entries derived from container labels ([`labels`]).
//! - **Actual state**: doko-owned entries currently in the registry.
//! - **Convergence**: the ordered operations turning actual into desired
//!   ([`diff`]), and the debounce machine deciding when a pass runs
//!   ([`debounce`]).
//!
//! # Invariants
//!
//! - Only entries whose ID carries the `doko-svc-` prefix are ever touched
//! - The same labels and port mappings always produce the same entry
//! - Reconciling an unchanged `(desired, actual)` pair yields no operations

use std::time::Duration;

pub mod debounce;
pub mod diff;
pub mod duration;
pub mod error;
pub mod labels;
pub mod model;

pub use debounce::{Debouncer, TriggerState};
pub use diff::{reconcile, Operation};
pub use duration::{format_duration, parse_duration, DurationError};
pub use error::LabelError;
pub use labels::{interpret, path_and_query};
pub use model::{
    ActualEntry, ActualState, DesiredEntry, DesiredState, HealthCheck, PortMapping, ServiceEntry,
    Workload,
};

/// Default quiet window before a pass runs.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

/// Default interval of the full-resync safety net.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay before resubscribing to a terminated event stream.
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default signal queue capacity.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 10;
