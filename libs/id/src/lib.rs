//! # doko-id
//!
//! Typed identifiers for the doko agent.
//!
//! ## Design Principles
//!
//! - Every registry entry doko creates carries a reserved prefix, so the
//!   agent can recognise its own entries when reading the registry back
//! - Service IDs are derived deterministically from the container ID
//! - Instance IDs are random and persisted by the agent between restarts
//!
//! ## ID Format
//!
//! - `doko-svc-{short container id}` for managed services
//! - `doko-ins-{instance id}` for the agent's own liveness service
//! - `doko-ins-chk-{instance id}` for the agent's TTL check
//!
//! Examples:
//! - `doko-svc-0123456789ab-cdef01234567`
//! - `doko-ins-5f0c2a9e41d7b3a86c0e9f12`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
