//! Desired/actual diff.
//!
//! `reconcile` is pure: it never talks to the registry. It produces the
//! ordered list of operations that moves the actual state to the desired
//! one; the applier executes them.

use doko_id::ServiceId;

use crate::model::{ActualState, DesiredEntry, DesiredState};

/// A single registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Remove a managed entry that no longer has a workload behind it.
    Deregister { id: ServiceId },

    /// Create or replace an entry. The registry treats registration as an
    /// upsert, so create and update share this variant.
    Register(DesiredEntry),
}

impl Operation {
    /// ID of the entry this operation touches.
    pub fn id(&self) -> &ServiceId {
        match self {
            Operation::Deregister { id } => id,
            Operation::Register(entry) => &entry.id,
        }
    }

    /// Operation kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Deregister { .. } => "deregister",
            Operation::Register(_) => "register",
        }
    }
}

/// Computes the operations converging `actual` to `desired`.
///
/// All deregistrations come first (in ID order), followed by registrations
/// for entries that are missing or differ (in ID order). Entries that are
/// semantically unchanged produce nothing.
pub fn reconcile(desired: &DesiredState, actual: &ActualState) -> Vec<Operation> {
    let deletions = actual
        .keys()
        .filter(|id| !desired.contains_key(*id))
        .map(|id| Operation::Deregister { id: id.clone() });

    let upserts = desired
        .values()
        .filter(|entry| {
            actual
                .get(&entry.id)
                .is_none_or(|current| !entry.same_as(current))
        })
        .map(|entry| Operation::Register(entry.clone()));

    deletions.chain(upserts).collect()
}
