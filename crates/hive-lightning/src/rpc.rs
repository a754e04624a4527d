use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hive_core::{HiveError, PeerId, Sats};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignMessage {
    /// zbase32 signature; empty means signing unavailable.
    pub zbase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckMessage {
    pub verified: bool,
    /// Pubkey recovered from the signature.
    pub pubkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub alias: String,
    #[serde(default)]
    pub blockheight: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayResult {
    pub status: String,
    #[serde(default)]
    pub payment_hash: Option<String>,
    #[serde(default)]
    pub amount_sent_msat: Option<u64>,
}

impl PayResult {
    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchInvoice {
    pub invoice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResult {
    pub bolt12: String,
    #[serde(default)]
    pub offer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forward {
    pub in_channel: String,
    #[serde(default)]
    pub out_channel: Option<String>,
    pub status: String,
    #[serde(default)]
    pub fee_msat: u64,
    #[serde(default)]
    pub received_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsbtFunding {
    pub psbt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenChannelInit {
    pub channel_id: String,
    pub psbt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenChannelUpdate {
    pub psbt: String,
    #[serde(default)]
    pub commitments_secured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPsbt {
    pub signed_psbt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFunding {
    pub channel_id: String,
    pub txid: String,
}

/// The Lightning node capability contract. Every method maps 1-to-1 onto a
/// node RPC call; deadlines and retry policy belong to the implementation.
#[async_trait]
pub trait LightningRpc: Send + Sync {
    async fn signmessage(&self, message: &str) -> Result<SignMessage, HiveError>;

    /// `pubkey` restricts verification to a claimed key; without it the node
    /// returns whichever key the signature recovers to.
    async fn checkmessage(
        &self,
        message: &str,
        zbase: &str,
        pubkey: Option<&PeerId>,
    ) -> Result<CheckMessage, HiveError>;

    async fn getinfo(&self) -> Result<NodeInfo, HiveError>;

    async fn pay(&self, bolt11: &str) -> Result<PayResult, HiveError>;

    async fn fetchinvoice(&self, offer: &str, amount_msat: u64) -> Result<FetchInvoice, HiveError>;

    async fn offer(&self, amount: &str, description: &str) -> Result<OfferResult, HiveError>;

    async fn listforwards(&self, status: Option<&str>) -> Result<Vec<Forward>, HiveError>;

    /// Current estimated on-chain feerate in sat/vB, for the open gate.
    async fn estimated_feerate_sat_per_vb(&self) -> Result<u64, HiveError>;

    // ── Channel open primitives (dual-funded v2 + single-funded fallback) ────

    async fn fundpsbt(&self, amount_sats: Sats, feerate: Option<&str>)
        -> Result<PsbtFunding, HiveError>;

    async fn openchannel_init(
        &self,
        peer: &PeerId,
        amount_sats: Sats,
        psbt: &str,
        feerate: Option<&str>,
        announce: bool,
    ) -> Result<OpenChannelInit, HiveError>;

    async fn openchannel_update(
        &self,
        channel_id: &str,
        psbt: &str,
    ) -> Result<OpenChannelUpdate, HiveError>;

    async fn openchannel_signed(
        &self,
        channel_id: &str,
        signed_psbt: &str,
    ) -> Result<ChannelFunding, HiveError>;

    async fn openchannel_abort(&self, channel_id: &str) -> Result<(), HiveError>;

    async fn signpsbt(&self, psbt: &str) -> Result<SignedPsbt, HiveError>;

    async fn unreserveinputs(&self, psbt: &str) -> Result<(), HiveError>;

    async fn fundchannel(
        &self,
        peer: &PeerId,
        amount_sats: Sats,
        feerate: Option<&str>,
        announce: bool,
    ) -> Result<ChannelFunding, HiveError>;
}
