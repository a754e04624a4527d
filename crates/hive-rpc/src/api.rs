use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use serde_json::Value;

use crate::types::{
    RpcAck, RpcChannelOpen, RpcCredential, RpcIntent, RpcMgmtCredential, RpcProposal,
    RpcReputation, RpcSchema, RpcSettledPeriod, RpcStatus, RpcValidation,
};

/// Hive JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "hive_" via `namespace = "hive"`.
#[rpc(server, namespace = "hive")]
pub trait HiveApi {
    /// Register a member's BOLT12 offer for settlement payouts.
    #[method(name = "registerOffer")]
    async fn register_offer(&self, peer_id: String, bolt12_offer: String) -> RpcResult<RpcAck>;

    /// Propose settlement for a period (defaults to the previous ISO week).
    /// Returns the proposal, or null when the period is skipped.
    #[method(name = "proposeSettlement")]
    async fn propose_settlement(&self, period: Option<String>) -> RpcResult<Option<RpcProposal>>;

    /// Current distributed-settlement status (pending/ready/settled).
    #[method(name = "settlementStatus")]
    async fn settlement_status(&self) -> RpcResult<Value>;

    /// Recently settled periods, newest first.
    #[method(name = "settlementHistory")]
    async fn settlement_history(&self, limit: u32) -> RpcResult<Vec<RpcSettledPeriod>>;

    /// Issue a DID reputation credential for a subject and gossip it.
    #[method(name = "issueCredential")]
    async fn issue_credential(
        &self,
        subject_id: String,
        domain: String,
        metrics: Value,
        outcome: String,
        evidence: Option<Vec<Value>>,
    ) -> RpcResult<RpcCredential>;

    /// Revoke a credential we issued and gossip the revocation.
    #[method(name = "revokeCredential")]
    async fn revoke_credential(&self, credential_id: String, reason: String) -> RpcResult<RpcAck>;

    /// Aggregated reputation for a subject, optionally filtered by domain.
    #[method(name = "reputation")]
    async fn reputation(
        &self,
        subject_id: String,
        domain: Option<String>,
    ) -> RpcResult<Option<RpcReputation>>;

    /// The full management schema registry.
    #[method(name = "listSchemas")]
    async fn list_schemas(&self) -> RpcResult<Vec<RpcSchema>>;

    /// Dry-run validation of a management action with danger and pricing.
    #[method(name = "validateAction")]
    async fn validate_action(
        &self,
        schema_id: String,
        action: String,
        params: Option<Value>,
        reputation_tier: Option<String>,
    ) -> RpcResult<RpcValidation>;

    /// Issue a management credential to an agent.
    #[method(name = "issueManagementCredential")]
    async fn issue_management_credential(
        &self,
        agent_id: String,
        node_id: String,
        tier: String,
        allowed_schemas: Vec<String>,
        constraints: Option<Value>,
        valid_days: Option<i64>,
    ) -> RpcResult<RpcMgmtCredential>;

    /// Revoke a management credential we issued and gossip the revocation.
    #[method(name = "revokeManagementCredential")]
    async fn revoke_management_credential(
        &self,
        credential_id: String,
        reason: String,
    ) -> RpcResult<RpcAck>;

    /// List management credentials with optional agent/node filters.
    #[method(name = "listManagementCredentials")]
    async fn list_management_credentials(
        &self,
        agent_id: Option<String>,
        node_id: Option<String>,
    ) -> RpcResult<Vec<RpcMgmtCredential>>;

    /// Announce a channel-open intent; granted=false means a lower pubkey
    /// holds the lock and this node must back off.
    #[method(name = "openChannelIntent")]
    async fn open_channel_intent(&self, target: String, deadline_secs: i64) -> RpcResult<RpcIntent>;

    /// Open a channel to `peer_id`: requires holding the intent lock, passes
    /// the feerate gate, attempts a dual-funded open and falls back to
    /// single-funded.
    #[method(name = "openChannel")]
    async fn open_channel(
        &self,
        peer_id: String,
        amount_sats: u64,
        feerate: Option<String>,
        announce: Option<bool>,
    ) -> RpcResult<RpcChannelOpen>;

    /// Gossip our signed view of a peer (HTLC reliability, responsiveness,
    /// centrality) to the fleet.
    #[method(name = "reportPeerReputation")]
    async fn report_peer_reputation(
        &self,
        subject_id: String,
        htlc_success_rate: f64,
        avg_response_ms: u32,
        centrality: f64,
        warnings: Option<Vec<String>>,
    ) -> RpcResult<RpcAck>;

    /// Inject a raw peer packet (external transport adapters only).
    #[method(name = "injectPeerPacket")]
    async fn inject_peer_packet(&self, packet: Value) -> RpcResult<RpcAck>;

    /// Node status summary.
    #[method(name = "getStatus")]
    async fn get_status(&self) -> RpcResult<RpcStatus>;
}
