use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use hive_core::types::PeerId;
use hive_core::CircuitBreaker;
use hive_lightning::LightningRpc;

use crate::IdentityAdapter;

/// Delegates signing to a sibling signer daemon over JSON-RPC, wrapped in a
/// circuit breaker. Verification stays local: it needs no secret material,
/// and a down signer must not block inbound message validation.
pub struct RemoteIdentity {
    signer_url: String,
    client: reqwest::Client,
    /// Local node RPC, used for verification only.
    rpc: Arc<dyn LightningRpc>,
    breaker: CircuitBreaker,
}

impl RemoteIdentity {
    pub fn new(signer_url: &str, rpc: Arc<dyn LightningRpc>) -> Self {
        Self {
            signer_url: signer_url.to_string(),
            client: reqwest::Client::new(),
            rpc,
            breaker: CircuitBreaker::new("remote-signer"),
        }
    }

    async fn call_signer(&self, method: &str, params: serde_json::Value) -> Option<serde_json::Value> {
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
        let resp = self
            .client
            .post(&self.signer_url)
            .timeout(Duration::from_secs(5))
            .json(&body)
            .send()
            .await
            .ok()?;
        let envelope: serde_json::Value = resp.json().await.ok()?;
        if envelope.get("error").map_or(false, |e| !e.is_null()) {
            return None;
        }
        Some(envelope["result"].clone())
    }
}

#[async_trait]
impl IdentityAdapter for RemoteIdentity {
    async fn sign(&self, message: &str) -> String {
        if !self.breaker.is_available() {
            warn!("remote signer circuit open, signing unavailable");
            return String::new();
        }
        match self.call_signer("hive_signMessage", json!({"message": message})).await {
            Some(result) if result["ok"].as_bool().unwrap_or(false) => {
                self.breaker.record_success();
                result["signature"].as_str().unwrap_or_default().to_string()
            }
            _ => {
                self.breaker.record_failure();
                String::new()
            }
        }
    }

    async fn verify(&self, message: &str, zbase: &str, claimed: &PeerId) -> bool {
        match self.rpc.checkmessage(message, zbase, Some(claimed)).await {
            Ok(result) => result.verified && PeerId::new(result.pubkey) == *claimed,
            Err(_) => false,
        }
    }

    async fn info(&self) -> serde_json::Value {
        json!({
            "mode": "remote",
            "backend": "hive-signer",
            "circuit_state": self.breaker.state().as_str(),
        })
    }
}
