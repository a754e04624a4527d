//! hive-rpc — the externally callable command surface of the coordinator.
//!
//! JSON-RPC 2.0 over HTTP via jsonrpsee; every command applies the same
//! validation and authorization rules as the equivalent inbound protocol
//! message.

pub mod api;
pub mod server;
pub mod types;

pub use api::HiveApiServer;
pub use server::{RpcServer, RpcServerState};
