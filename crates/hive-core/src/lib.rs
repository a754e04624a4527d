//! hive-core — shared types, entity records, errors and configuration for
//! the hive fleet coordinator.
//!
//! Everything persisted or carried on the wire is defined here so that the
//! storage, gossip, settlement and management crates agree on one data model.

pub mod breaker;
pub mod config;
pub mod constants;
pub mod credential;
pub mod error;
pub mod intent;
pub mod member;
pub mod mgmt;
pub mod ratelimit;
pub mod settlement;
pub mod types;

pub use breaker::{BreakerState, CircuitBreaker};
pub use config::{GovernanceMode, HiveConfig, IdentityMode, VpnMode};
pub use error::HiveError;
pub use types::{PeerId, Sats, Timestamp};
