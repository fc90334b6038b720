//! Data model shared by the desired and actual sides of a reconciliation.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use doko_id::ServiceId;

/// Meta key written on every managed entry.
pub const OWNER_META_KEY: &str = "doko";

/// Value of [`OWNER_META_KEY`].
pub const OWNER_META_VALUE: &str = "true";

/// Default health check interval.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Default health check timeout.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default HTTP health check path.
pub const DEFAULT_HTTP_CHECK_PATH: &str = "/_health";

/// A published port mapping as reported by the workload runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port inside the workload's network namespace.
    pub private: u16,

    /// Port published on the host, if any.
    pub public: Option<u16>,
}

/// One running workload, reduced to what the label interpreter needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    /// Runtime-assigned workload ID (full container ID).
    pub id: String,

    /// Workload labels.
    pub labels: BTreeMap<String, String>,

    /// Network mode as reported by the runtime (`host`, `default`, `bridge`, ...).
    pub network_mode: String,

    /// Published port mappings.
    pub ports: Vec<PortMapping>,
}

/// Health check policy attached to a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheck {
    /// HTTP GET against `path` on the entry's resolved port.
    Http {
        path: String,
        interval: Duration,
        timeout: Duration,
    },

    /// gRPC health protocol against the entry's resolved port.
    Grpc { interval: Duration, timeout: Duration },
}

impl HealthCheck {
    /// Short name of the check kind.
    pub fn kind(&self) -> &'static str {
        match self {
            HealthCheck::Http { .. } => "http",
            HealthCheck::Grpc { .. } => "grpc",
        }
    }

    /// Check interval.
    pub fn interval(&self) -> Duration {
        match self {
            HealthCheck::Http { interval, .. } | HealthCheck::Grpc { interval, .. } => *interval,
        }
    }

    /// Check timeout.
    pub fn timeout(&self) -> Duration {
        match self {
            HealthCheck::Http { timeout, .. } | HealthCheck::Grpc { timeout, .. } => *timeout,
        }
    }
}

/// A registry entry.
///
/// The desired side is derived from workload labels; the actual side is
/// read back from the registry. Both share this shape so they can be
/// compared directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Registry ID, always carrying the managed prefix.
    pub id: ServiceId,

    /// Normalized service name.
    pub name: String,

    /// Network-reachable port.
    pub port: u16,

    /// Normalized tags. Order is not significant.
    pub tags: Vec<String>,

    /// Pass-through meta, including the ownership marker.
    pub meta: BTreeMap<String, String>,

    /// Optional health check.
    pub check: Option<HealthCheck>,
}

/// Entry derived from a workload's labels.
pub type DesiredEntry = ServiceEntry;

/// Entry read back from the registry.
pub type ActualEntry = ServiceEntry;

/// Desired entries keyed by ID.
pub type DesiredState = BTreeMap<ServiceId, DesiredEntry>;

/// Managed registry entries keyed by ID.
pub type ActualState = BTreeMap<ServiceId, ActualEntry>;

impl ServiceEntry {
    /// Semantic equality: tags compare as sets, everything else field by field.
    ///
    /// The registry does not promise to return tags in the order they were
    /// written, so a plain `==` would report drift on every pass.
    pub fn same_as(&self, other: &ServiceEntry) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.port == other.port
            && tag_set(&self.tags) == tag_set(&other.tags)
            && self.meta == other.meta
            && self.check == other.check
    }
}

fn tag_set(tags: &[String]) -> BTreeSet<&str> {
    tags.iter().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tags: &[&str]) -> ServiceEntry {
        ServiceEntry {
            id: ServiceId::for_container("abc").unwrap(),
            name: "web".to_string(),
            port: 8080,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            meta: BTreeMap::from([(OWNER_META_KEY.to_string(), OWNER_META_VALUE.to_string())]),
            check: None,
        }
    }

    #[test]
    fn test_same_as_ignores_tag_order() {
        assert!(entry(&["a", "b"]).same_as(&entry(&["b", "a"])));
        assert!(entry(&["a", "b"]).same_as(&entry(&["a", "b", "a"])));
    }

    #[test]
    fn test_same_as_detects_tag_change() {
        assert!(!entry(&["a"]).same_as(&entry(&["a", "b"])));
    }

    #[test]
    fn test_same_as_detects_check_change() {
        let mut with_check = entry(&[]);
        with_check.check = Some(HealthCheck::Grpc {
            interval: DEFAULT_CHECK_INTERVAL,
            timeout: DEFAULT_CHECK_TIMEOUT,
        });
        assert!(!entry(&[]).same_as(&with_check));
    }

    #[test]
    fn test_same_as_detects_meta_change() {
        let mut other = entry(&[]);
        other.meta.insert("version".to_string(), "2".to_string());
        assert!(!entry(&[]).same_as(&other));
    }

    #[test]
    fn test_health_check_accessors() {
        let check = HealthCheck::Http {
            path: DEFAULT_HTTP_CHECK_PATH.to_string(),
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(check.kind(), "http");
        assert_eq!(check.interval(), Duration::from_secs(3));
        assert_eq!(check.timeout(), Duration::from_secs(1));
    }
}
