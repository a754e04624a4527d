//! hive-lightning — the Lightning node capability contract.
//!
//! The coordinator treats its Lightning node as an opaque capability: sign
//! and verify messages under the HSM key, pay BOLT12 offers, report
//! forwards, and open channels. `LightningRpc` is the seam; `HttpLightningRpc`
//! talks JSON-RPC 2.0 over HTTP to the node, and tests script the trait
//! directly.

pub mod channel_open;
pub mod http;
pub mod rpc;

pub use channel_open::{open_channel, ChannelOpenOutcome, FundingType, MAX_V2_UPDATE_ROUNDS};
pub use http::HttpLightningRpc;
pub use rpc::{
    CheckMessage, Forward, LightningRpc, NodeInfo, OfferResult, PayResult, PsbtFunding,
    SignMessage,
};
