//! hive-gossip — the membership and message-propagation substrate.
//!
//! Keeps the member table and per-peer state snapshots current from HELLO
//! and gossip traffic, deduplicates content-addressed messages, floods them
//! with a TTL and path exclusion, and resolves scarce-action races through
//! intent locks.

pub mod dedup;
pub mod intent;
pub mod members;
pub mod relay;
pub mod state_hash;

pub use dedup::Deduplicator;
pub use intent::IntentRegistry;
pub use members::MemberTable;
pub use relay::Relay;
pub use state_hash::local_state_hash;
