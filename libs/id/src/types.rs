//! Typed ID definitions for doko.
//!
//! `ServiceId` is the ownership marker: only entries whose ID carries its
//! prefix are ever read back, updated or removed by the reconciler.

use crate::{define_id, IdError};

// =============================================================================
// Managed Services
// =============================================================================

define_id!(ServiceId, "doko-svc-");

impl ServiceId {
    /// Derives the service ID for a container.
    ///
    /// Container IDs longer than 24 characters are shortened to
    /// `{first 12}-{next 12}`, which stays unique across coexisting
    /// containers while keeping registry IDs readable.
    pub fn for_container(container_id: &str) -> Result<Self, IdError> {
        Self::from_suffix(&shorten_container_id(container_id))
    }
}

/// Shortens a container ID to `{first 12}-{next 12}` when longer than 24 chars.
#[must_use]
pub fn shorten_container_id(id: &str) -> String {
    match (id.get(..12), id.get(12..24)) {
        (Some(head), Some(tail)) if id.len() > 24 => format!("{head}-{tail}"),
        _ => id.to_string(),
    }
}

// =============================================================================
// Agent Instance
// =============================================================================

define_id!(InstanceServiceId, "doko-ins-");
define_id!(InstanceCheckId, "doko-ins-chk-");

/// Length in bytes of a freshly generated instance ID.
pub const INSTANCE_ID_BYTES: usize = 12;

/// Identity of one running agent, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generates a fresh random instance ID (24 lowercase hex chars).
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; INSTANCE_ID_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Parses a persisted instance ID. Surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if let Some(ch) = s.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
            return Err(IdError::InvalidCharacter {
                id: s.to_string(),
                ch,
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the raw ID string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The registry service ID of this instance's liveness entry.
    #[must_use]
    pub fn service_id(&self) -> InstanceServiceId {
        InstanceServiceId(format!("{}{}", InstanceServiceId::PREFIX, self.0))
    }

    /// The registry check ID of this instance's TTL check.
    #[must_use]
    pub fn check_id(&self) -> InstanceCheckId {
        InstanceCheckId(format!("{}{}", InstanceCheckId::PREFIX, self.0))
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Tests
// =============================================================================
