//! Per-workload interpretation errors.

use doko_id::IdError;
use thiserror::Error;

use crate::duration::DurationError;

/// Why a workload carrying a service name could not become a desired entry.
///
/// These never abort a pass: the caller logs them and leaves the workload
/// out of the desired set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LabelError {
    /// Port label missing, non-numeric or zero.
    #[error("label 'doko.port' is missing or invalid: '{value}'")]
    InvalidPort { value: String },

    /// Bridge-mode workload whose declared port has no published mapping.
    #[error("container port '{0}' is not published")]
    PortNotPublished(u16),

    /// Network mode other than host or bridge.
    #[error("network mode '{0}' not supported")]
    UnsupportedNetworkMode(String),

    /// Check label set to something other than http or grpc.
    #[error("unknown check type '{0}'")]
    UnknownCheckKind(String),

    /// Check interval or timeout label is not a duration.
    #[error("label '{key}' is invalid: {source}")]
    InvalidDuration {
        key: &'static str,
        #[source]
        source: DurationError,
    },

    /// Workload ID cannot be turned into a service ID.
    #[error("invalid workload id: {0}")]
    InvalidWorkloadId(#[from] IdError),
}
