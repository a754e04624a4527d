use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RpcAck {
    pub fn ok() -> Self {
        Self { ok: true, details: None }
    }

    pub fn with_details(details: impl Into<String>) -> Self {
        Self { ok: true, details: Some(details.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcProposal {
    pub proposal_id: String,
    pub period: String,
    pub data_hash: String,
    pub plan_hash: String,
    pub total_fees_sats: u64,
    pub member_count: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettledPeriod {
    pub period: String,
    pub proposal_id: String,
    pub total_distributed_sats: u64,
    pub settled_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCredential {
    pub credential_id: String,
    pub issuer_id: String,
    pub subject_id: String,
    pub domain: String,
    pub outcome: String,
    pub issued_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReputation {
    pub subject_id: String,
    pub domain: String,
    pub score: u8,
    pub tier: String,
    pub confidence: String,
    pub credential_count: usize,
    pub issuer_count: usize,
    pub components: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSchemaAction {
    pub action: String,
    pub description: String,
    pub danger_total: u8,
    pub required_tier: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSchema {
    pub schema_id: String,
    pub name: String,
    pub description: String,
    pub danger_range: (u8, u8),
    pub actions: Vec<RpcSchemaAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub danger_total: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_sats: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMgmtCredential {
    pub credential_id: String,
    pub issuer_id: String,
    pub agent_id: String,
    pub node_id: String,
    pub tier: String,
    pub allowed_schemas: Vec<String>,
    pub valid_from: i64,
    pub valid_until: i64,
    pub revoked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcChannelOpen {
    pub funding_type: String,
    pub channel_id: String,
    pub txid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcIntent {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStatus {
    pub our_pubkey: String,
    pub member_count: u64,
    pub identity: Value,
    pub settlement: Value,
    pub governance_mode: String,
}
