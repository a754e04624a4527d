use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use hive_core::types::PeerId;
use hive_lightning::LightningRpc;

use crate::IdentityAdapter;

/// Signs and verifies through the Lightning node's HSM directly.
pub struct LocalIdentity {
    rpc: Arc<dyn LightningRpc>,
}

impl LocalIdentity {
    pub fn new(rpc: Arc<dyn LightningRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl IdentityAdapter for LocalIdentity {
    async fn sign(&self, message: &str) -> String {
        match self.rpc.signmessage(message).await {
            Ok(result) => result.zbase,
            Err(e) => {
                warn!(error = %e, "HSM signing failed");
                String::new()
            }
        }
    }

    async fn verify(&self, message: &str, zbase: &str, claimed: &PeerId) -> bool {
        match self.rpc.checkmessage(message, zbase, Some(claimed)).await {
            Ok(result) => {
                result.verified && PeerId::new(result.pubkey) == *claimed
            }
            Err(_) => false,
        }
    }

    async fn info(&self) -> serde_json::Value {
        json!({"mode": "local", "backend": "lightning-hsm"})
    }
}
