use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

use hive_core::{HiveError, PeerId, Sats};

use crate::rpc::{
    ChannelFunding, CheckMessage, FetchInvoice, Forward, LightningRpc, NodeInfo,
    OpenChannelInit, OpenChannelUpdate, OfferResult, PayResult, PsbtFunding, SignMessage,
    SignedPsbt,
};

/// Minimum deadline for signing calls; the HSM round-trip must never be cut
/// short by an aggressive default.
const SIGN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC 2.0 client for the Lightning node over HTTP.
///
/// Uses raw HTTP POST with serde_json rather than a full RPC framework to
/// keep the surface identical to the node's method names.
pub struct HttpLightningRpc {
    url: String,
    client: reqwest::Client,
    /// Deadline applied to `pay`/`fetchinvoice`; settlement transfers can be
    /// slow multi-hop payments.
    payment_timeout: Duration,
}

impl HttpLightningRpc {
    pub fn new(url: &str) -> Self {
        Self::with_payment_timeout(url, Duration::from_secs(120))
    }

    pub fn with_payment_timeout(url: &str, payment_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
            payment_timeout,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, HiveError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let resp = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| HiveError::Unavailable(format!("lightning rpc {method}: {e}")))?;

        let envelope: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| HiveError::Serialization(format!("lightning rpc {method}: {e}")))?;

        if let Some(err) = envelope.get("error") {
            if !err.is_null() {
                return Err(HiveError::Unavailable(format!("lightning rpc {method}: {err}")));
            }
        }

        serde_json::from_value(envelope["result"].clone())
            .map_err(|e| HiveError::Serialization(format!("lightning rpc {method} result: {e}")))
    }
}

#[async_trait]
impl LightningRpc for HttpLightningRpc {
    async fn signmessage(&self, message: &str) -> Result<SignMessage, HiveError> {
        self.call("signmessage", json!({"message": message}), SIGN_TIMEOUT)
            .await
    }

    async fn checkmessage(
        &self,
        message: &str,
        zbase: &str,
        pubkey: Option<&PeerId>,
    ) -> Result<CheckMessage, HiveError> {
        let mut params = json!({"message": message, "zbase": zbase});
        if let Some(pk) = pubkey {
            params["pubkey"] = json!(pk.as_str());
        }
        self.call("checkmessage", params, SIGN_TIMEOUT).await
    }

    async fn getinfo(&self) -> Result<NodeInfo, HiveError> {
        self.call("getinfo", json!({}), DEFAULT_TIMEOUT).await
    }

    async fn pay(&self, bolt11: &str) -> Result<PayResult, HiveError> {
        self.call("pay", json!({"bolt11": bolt11}), self.payment_timeout)
            .await
    }

    async fn fetchinvoice(&self, offer: &str, amount_msat: u64) -> Result<FetchInvoice, HiveError> {
        self.call(
            "fetchinvoice",
            json!({"offer": offer, "amount_msat": format!("{amount_msat}msat")}),
            self.payment_timeout,
        )
        .await
    }

    async fn offer(&self, amount: &str, description: &str) -> Result<OfferResult, HiveError> {
        self.call(
            "offer",
            json!({"amount": amount, "description": description}),
            DEFAULT_TIMEOUT,
        )
        .await
    }

    async fn listforwards(&self, status: Option<&str>) -> Result<Vec<Forward>, HiveError> {
        let params = match status {
            Some(s) => json!({"status": s}),
            None => json!({}),
        };
        let result: serde_json::Value = self.call("listforwards", params, DEFAULT_TIMEOUT).await?;
        serde_json::from_value(result["forwards"].clone())
            .map_err(|e| HiveError::Serialization(format!("listforwards: {e}")))
    }

    async fn estimated_feerate_sat_per_vb(&self) -> Result<u64, HiveError> {
        let result: serde_json::Value = self.call("feerates", json!({"style": "perkb"}), DEFAULT_TIMEOUT).await?;
        // perkb opening rate → sat/vB.
        result["perkb"]["opening"]
            .as_u64()
            .map(|perkb| perkb / 1000)
            .ok_or_else(|| HiveError::Serialization("feerates: missing perkb.opening".into()))
    }

    async fn fundpsbt(
        &self,
        amount_sats: Sats,
        feerate: Option<&str>,
    ) -> Result<PsbtFunding, HiveError> {
        let mut params = json!({"satoshi": amount_sats, "startweight": 250});
        if let Some(rate) = feerate {
            params["feerate"] = json!(rate);
        }
        self.call("fundpsbt", params, DEFAULT_TIMEOUT).await
    }

    async fn openchannel_init(
        &self,
        peer: &PeerId,
        amount_sats: Sats,
        psbt: &str,
        feerate: Option<&str>,
        announce: bool,
    ) -> Result<OpenChannelInit, HiveError> {
        let mut params = json!({
            "id": peer.as_str(),
            "amount": amount_sats,
            "initialpsbt": psbt,
            "announce": announce,
        });
        if let Some(rate) = feerate {
            params["commitment_feerate"] = json!(rate);
        }
        self.call("openchannel_init", params, DEFAULT_TIMEOUT).await
    }

    async fn openchannel_update(
        &self,
        channel_id: &str,
        psbt: &str,
    ) -> Result<OpenChannelUpdate, HiveError> {
        self.call(
            "openchannel_update",
            json!({"channel_id": channel_id, "psbt": psbt}),
            DEFAULT_TIMEOUT,
        )
        .await
    }

    async fn openchannel_signed(
        &self,
        channel_id: &str,
        signed_psbt: &str,
    ) -> Result<ChannelFunding, HiveError> {
        self.call(
            "openchannel_signed",
            json!({"channel_id": channel_id, "signed_psbt": signed_psbt}),
            DEFAULT_TIMEOUT,
        )
        .await
    }

    async fn openchannel_abort(&self, channel_id: &str) -> Result<(), HiveError> {
        let _: serde_json::Value = self
            .call("openchannel_abort", json!({"channel_id": channel_id}), DEFAULT_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn signpsbt(&self, psbt: &str) -> Result<SignedPsbt, HiveError> {
        self.call("signpsbt", json!({"psbt": psbt}), DEFAULT_TIMEOUT).await
    }

    async fn unreserveinputs(&self, psbt: &str) -> Result<(), HiveError> {
        let _: serde_json::Value = self
            .call("unreserveinputs", json!({"psbt": psbt}), DEFAULT_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn fundchannel(
        &self,
        peer: &PeerId,
        amount_sats: Sats,
        feerate: Option<&str>,
        announce: bool,
    ) -> Result<ChannelFunding, HiveError> {
        let mut params = json!({
            "id": peer.as_str(),
            "amount": amount_sats,
            "announce": announce,
        });
        if let Some(rate) = feerate {
            params["feerate"] = json!(rate);
        }
        self.call("fundchannel", params, DEFAULT_TIMEOUT).await
    }
}
