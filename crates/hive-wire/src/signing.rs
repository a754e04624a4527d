//! Canonical signing payload builders.
//!
//! Each protocol signature covers exactly the bytes produced here: sorted
//! keys, compact separators, a fixed field list per message type. Any field
//! not listed is excluded from the signature. Sender and verifier must call
//! the same function — these are the single source of truth.

use serde_json::json;

use hive_core::credential::DidCredential;
use hive_core::mgmt::{ManagementCredential, ManagementReceipt};
use hive_core::types::{PeerId, Sats, Timestamp};

use crate::canonical::canonical_json;

/// DID credential signature covers the issuance facts, never storage
/// bookkeeping (`issued_at`, `received_from`, …).
pub fn did_credential_signing_payload(cred: &DidCredential) -> String {
    canonical_json(&json!({
        "issuer_id": cred.issuer_id.as_str(),
        "subject_id": cred.subject_id.as_str(),
        "domain": cred.domain,
        "period_start": cred.period_start,
        "period_end": cred.period_end,
        "metrics": cred.metrics,
        "outcome": cred.outcome.as_str(),
    }))
}

pub fn did_revoke_signing_payload(credential_id: &str, reason: &str) -> String {
    canonical_json(&json!({
        "credential_id": credential_id,
        "action": "revoke",
        "reason": reason,
    }))
}

pub fn mgmt_credential_signing_payload(cred: &ManagementCredential) -> String {
    canonical_json(&json!({
        "credential_id": cred.credential_id,
        "issuer_id": cred.issuer_id.as_str(),
        "agent_id": cred.agent_id.as_str(),
        "node_id": cred.node_id.as_str(),
        "tier": cred.tier.as_str(),
        "allowed_schemas": cred.allowed_schemas,
        "constraints": cred.constraints,
        "valid_from": cred.valid_from,
        "valid_until": cred.valid_until,
    }))
}

pub fn mgmt_revoke_signing_payload(credential_id: &str, reason: &str) -> String {
    canonical_json(&json!({
        "credential_id": credential_id,
        "action": "mgmt_revoke",
        "reason": reason,
    }))
}

pub fn receipt_signing_payload(receipt: &ManagementReceipt) -> String {
    canonical_json(&json!({
        "receipt_id": receipt.receipt_id,
        "credential_id": receipt.credential_id,
        "schema_id": receipt.schema_id,
        "action": receipt.action,
        "danger_score": receipt.danger_score,
        "executed_at": receipt.executed_at,
    }))
}

pub fn settlement_ready_signing_payload(
    proposal_id: &str,
    voter_peer_id: &PeerId,
    data_hash: &str,
    timestamp: Timestamp,
) -> String {
    canonical_json(&json!({
        "proposal_id": proposal_id,
        "voter_peer_id": voter_peer_id.as_str(),
        "data_hash": data_hash,
        "timestamp": timestamp,
    }))
}

pub fn settlement_executed_signing_payload(
    proposal_id: &str,
    executor_peer_id: &PeerId,
    plan_hash: &str,
    total_sent_sats: Sats,
    timestamp: Timestamp,
) -> String {
    canonical_json(&json!({
        "proposal_id": proposal_id,
        "executor_peer_id": executor_peer_id.as_str(),
        "plan_hash": plan_hash,
        "total_sent_sats": total_sent_sats,
        "timestamp": timestamp,
    }))
}
