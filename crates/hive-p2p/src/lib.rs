//! hive-p2p — the transport adapter.
//!
//! Carries signed hive envelopes over a libp2p GossipSub topic with
//! Kademlia peer discovery. The coordinator core treats this crate as an
//! opaque capability: push envelopes into the outbound queue, pull inbound
//! envelopes from the inbound queue.

pub mod config;
pub mod network;

pub use config::P2pConfig;
pub use network::{P2pHandle, P2pNetwork};
