//! hive-identity — uniform sign/verify over protocol message payloads.
//!
//! Two modes: `LocalIdentity` signs through the Lightning node's HSM
//! directly; `RemoteIdentity` delegates signing (never verification) to a
//! sibling signer daemon behind a circuit breaker. An empty signature means
//! "signing unavailable" and is a hard failure for outbound protocol
//! messages.

mod local;
mod remote;

use async_trait::async_trait;

use hive_core::types::PeerId;

pub use local::LocalIdentity;
pub use remote::RemoteIdentity;

#[async_trait]
pub trait IdentityAdapter: Send + Sync {
    /// Sign `message` under the node identity. Returns the zbase signature,
    /// or an empty string when signing is unavailable.
    async fn sign(&self, message: &str) -> String;

    /// Verify `zbase` over `message` and confirm the recovered pubkey equals
    /// `claimed`. Fail-closed: any RPC error is a rejection.
    async fn verify(&self, message: &str, zbase: &str, claimed: &PeerId) -> bool;

    /// Adapter diagnostics: at least `{"mode": "local"|"remote"}`.
    async fn info(&self) -> serde_json::Value;
}
