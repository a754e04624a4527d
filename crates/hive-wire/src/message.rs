use serde::{Deserialize, Serialize};

use hive_core::credential::DidCredential;
use hive_core::intent::IntentKind;
use hive_core::member::PeerReputationReport;
use hive_core::mgmt::ManagementCredential;
use hive_core::settlement::MemberContribution;
use hive_core::types::{PeerId, Sats, Timestamp};

/// Message kind discriminant, stable across wire versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Hello,
    Gossip,
    StateHash,
    FeeReport,
    FeeReportRequest,
    Intent,
    IntentAck,
    DidCredentialPresent,
    DidCredentialRevoke,
    MgmtCredentialPresent,
    MgmtCredentialRevoke,
    SettlementPropose,
    SettlementReady,
    SettlementExecute,
    PeerReputationSnapshot,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Hello => "hello",
            MessageKind::Gossip => "gossip",
            MessageKind::StateHash => "state_hash",
            MessageKind::FeeReport => "fee_report",
            MessageKind::FeeReportRequest => "fee_report_request",
            MessageKind::Intent => "intent",
            MessageKind::IntentAck => "intent_ack",
            MessageKind::DidCredentialPresent => "did_credential_present",
            MessageKind::DidCredentialRevoke => "did_credential_revoke",
            MessageKind::MgmtCredentialPresent => "mgmt_credential_present",
            MessageKind::MgmtCredentialRevoke => "mgmt_credential_revoke",
            MessageKind::SettlementPropose => "settlement_propose",
            MessageKind::SettlementReady => "settlement_ready",
            MessageKind::SettlementExecute => "settlement_execute",
            MessageKind::PeerReputationSnapshot => "peer_reputation_snapshot",
        }
    }
}

// ── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub capacity_sats: Sats,
    pub forward_count: u64,
    pub ts: Timestamp,
}

/// Periodic state gossip: the sender's current fee/forward counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipPayload {
    pub capacity_sats: Sats,
    pub forward_count: u64,
    pub fees_earned_sats: Sats,
    pub rebalance_costs_sats: Sats,
    pub ts: Timestamp,
}

/// Compact fingerprint of the sender's counters; receivers compare against
/// their cached view and request a fee report on divergence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHashPayload {
    pub state_hash: String,
    pub ts: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeReportPayload {
    pub period: String,
    pub fees_earned_sats: Sats,
    pub forward_count: u64,
    pub rebalance_costs_sats: Sats,
    pub ts: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeReportRequestPayload {
    pub period: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPayload {
    pub request_id: String,
    pub kind: IntentKind,
    pub target: String,
    pub deadline: Timestamp,
    pub ts: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAckPayload {
    pub request_id: String,
    pub kind: IntentKind,
    pub target: String,
    /// True when the acker concedes the lock to the original claimant.
    pub conceded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidCredentialPresentPayload {
    pub credential: DidCredential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidCredentialRevokePayload {
    pub credential_id: String,
    pub issuer_id: PeerId,
    pub reason: String,
    /// Issuer signature over the revocation signing payload.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MgmtCredentialPresentPayload {
    pub credential: ManagementCredential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MgmtCredentialRevokePayload {
    pub credential_id: String,
    pub issuer_id: PeerId,
    pub reason: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementProposePayload {
    pub proposal_id: String,
    pub period: String,
    pub proposer_peer_id: PeerId,
    pub data_hash: String,
    pub plan_hash: String,
    pub total_fees_sats: Sats,
    pub member_count: usize,
    pub contributions: Vec<MemberContribution>,
    pub ts: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReadyPayload {
    pub proposal_id: String,
    pub voter_peer_id: PeerId,
    pub data_hash: String,
    pub ts: Timestamp,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementExecutePayload {
    pub proposal_id: String,
    pub executor_peer_id: PeerId,
    pub plan_hash: String,
    pub total_sent_sats: Sats,
    #[serde(default)]
    pub payment_hash: Option<String>,
    pub ts: Timestamp,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerReputationSnapshotPayload {
    pub report: PeerReputationReport,
}

// ── Message enum ─────────────────────────────────────────────────────────────

/// The typed hive protocol message set.
///
/// The wire form (`{"type": ..., ...fields}`) and the canonical signing
/// bytes are produced by `to_tagged_value`/`from_tagged_value`; the derived
/// serde representation is an implementation detail behind them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiveMessage {
    Hello(HelloPayload),
    Gossip(GossipPayload),
    StateHash(StateHashPayload),
    FeeReport(FeeReportPayload),
    FeeReportRequest(FeeReportRequestPayload),
    Intent(IntentPayload),
    IntentAck(IntentAckPayload),
    DidCredentialPresent(DidCredentialPresentPayload),
    DidCredentialRevoke(DidCredentialRevokePayload),
    MgmtCredentialPresent(MgmtCredentialPresentPayload),
    MgmtCredentialRevoke(MgmtCredentialRevokePayload),
    SettlementPropose(SettlementProposePayload),
    SettlementReady(SettlementReadyPayload),
    SettlementExecute(SettlementExecutePayload),
    PeerReputationSnapshot(PeerReputationSnapshotPayload),
}

impl HiveMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            HiveMessage::Hello(_) => MessageKind::Hello,
            HiveMessage::Gossip(_) => MessageKind::Gossip,
            HiveMessage::StateHash(_) => MessageKind::StateHash,
            HiveMessage::FeeReport(_) => MessageKind::FeeReport,
            HiveMessage::FeeReportRequest(_) => MessageKind::FeeReportRequest,
            HiveMessage::Intent(_) => MessageKind::Intent,
            HiveMessage::IntentAck(_) => MessageKind::IntentAck,
            HiveMessage::DidCredentialPresent(_) => MessageKind::DidCredentialPresent,
            HiveMessage::DidCredentialRevoke(_) => MessageKind::DidCredentialRevoke,
            HiveMessage::MgmtCredentialPresent(_) => MessageKind::MgmtCredentialPresent,
            HiveMessage::MgmtCredentialRevoke(_) => MessageKind::MgmtCredentialRevoke,
            HiveMessage::SettlementPropose(_) => MessageKind::SettlementPropose,
            HiveMessage::SettlementReady(_) => MessageKind::SettlementReady,
            HiveMessage::SettlementExecute(_) => MessageKind::SettlementExecute,
            HiveMessage::PeerReputationSnapshot(_) => MessageKind::PeerReputationSnapshot,
        }
    }

    /// Canonical JSON object for this message: the payload fields with a
    /// `"type"` tag merged in, keys sorted, compact separators. This string
    /// is what `msg_id` hashes. Relay metadata never appears in it.
    pub fn canonical_payload(&self) -> String {
        crate::canonical::canonical_json(&self.to_tagged_value())
    }

    /// `{"type": <kind>, ...payload fields}` as a JSON value.
    pub fn to_tagged_value(&self) -> serde_json::Value {
        let outer = serde_json::to_value(self).expect("message serializes");
        let (tag, inner) = match outer {
            serde_json::Value::Object(map) => {
                let mut it = map.into_iter();
                it.next().expect("externally tagged enum has one entry")
            }
            _ => unreachable!("enum serializes to a single-entry object"),
        };
        let mut fields = match inner {
            serde_json::Value::Object(m) => m,
            other => {
                let mut m = serde_json::Map::new();
                m.insert("value".into(), other);
                m
            }
        };
        fields.insert("type".into(), serde_json::Value::String(tag));
        serde_json::Value::Object(fields)
    }

    /// Inverse of `to_tagged_value`: rebuild a typed message from a
    /// `{"type": ..., ...fields}` object.
    pub fn from_tagged_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error;
        let mut fields = match value {
            serde_json::Value::Object(m) => m,
            _ => return Err(serde_json::Error::custom("message must be a JSON object")),
        };
        let tag = match fields.remove("type") {
            Some(serde_json::Value::String(t)) => t,
            _ => return Err(serde_json::Error::custom("missing message type tag")),
        };
        let mut outer = serde_json::Map::new();
        outer.insert(tag, serde_json::Value::Object(fields));
        serde_json::from_value(serde_json::Value::Object(outer))
    }
}
