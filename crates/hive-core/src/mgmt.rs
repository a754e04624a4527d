use serde::{Deserialize, Serialize};

use crate::constants::MAX_CREDENTIAL_VALID_DAYS;
use crate::error::HiveError;
use crate::types::{PeerId, Timestamp};

/// Permission tier hierarchy for management actions.
/// Ordered: monitor < standard < advanced < admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
    Monitor,
    Standard,
    Advanced,
    Admin,
}

impl PermissionTier {
    pub fn rank(&self) -> u8 {
        match self {
            PermissionTier::Monitor => 0,
            PermissionTier::Standard => 1,
            PermissionTier::Advanced => 2,
            PermissionTier::Admin => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionTier::Monitor => "monitor",
            PermissionTier::Standard => "standard",
            PermissionTier::Advanced => "advanced",
            PermissionTier::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monitor" => Some(PermissionTier::Monitor),
            "standard" => Some(PermissionTier::Standard),
            "advanced" => Some(PermissionTier::Advanced),
            "admin" => Some(PermissionTier::Admin),
            _ => None,
        }
    }
}

/// Grant from an operator to an agent authorizing schema-gated actions
/// against a node. Signed fields are frozen after issuance; the only
/// mutation the store ever applies is setting `revoked_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementCredential {
    pub credential_id: String,
    /// Node operator pubkey.
    pub issuer_id: PeerId,
    /// Agent/advisor pubkey.
    pub agent_id: PeerId,
    /// Managed node pubkey.
    pub node_id: PeerId,
    pub tier: PermissionTier,
    /// Schema patterns: exact id, `"*"`, or `"prefix/*"`.
    pub allowed_schemas: Vec<String>,
    /// Advisory operational constraints (JSON); not enforced at
    /// authorization time.
    pub constraints: serde_json::Value,
    pub valid_from: Timestamp,
    pub valid_until: Timestamp,
    pub signature: String,
    #[serde(default)]
    pub revoked_at: Option<Timestamp>,
}

impl ManagementCredential {
    /// Construct with the post-init invariants checked up front: a credential
    /// with a reversed or over-long validity window never exists.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credential_id: String,
        issuer_id: PeerId,
        agent_id: PeerId,
        node_id: PeerId,
        tier: PermissionTier,
        allowed_schemas: Vec<String>,
        constraints: serde_json::Value,
        valid_from: Timestamp,
        valid_until: Timestamp,
        signature: String,
    ) -> Result<Self, HiveError> {
        if valid_until <= valid_from {
            return Err(HiveError::Validation(
                "valid_until must be after valid_from".into(),
            ));
        }
        if valid_until - valid_from > MAX_CREDENTIAL_VALID_DAYS * 86_400 {
            return Err(HiveError::Validation(format!(
                "validity window exceeds {MAX_CREDENTIAL_VALID_DAYS} days"
            )));
        }
        if allowed_schemas.is_empty() {
            return Err(HiveError::Validation("allowed_schemas cannot be empty".into()));
        }
        Ok(Self {
            credential_id,
            issuer_id,
            agent_id,
            node_id,
            tier,
            allowed_schemas,
            constraints,
            valid_from,
            valid_until,
            signature,
            revoked_at: None,
        })
    }

    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.revoked_at.is_none() && self.valid_from <= now && now <= self.valid_until
    }
}

/// Signed record of one executed management action. Orphan receipts
/// (unknown or revoked credential) are rejected before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementReceipt {
    pub receipt_id: String,
    pub credential_id: String,
    pub schema_id: String,
    pub action: String,
    pub params: serde_json::Value,
    pub danger_score: u8,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub state_hash_before: Option<String>,
    #[serde(default)]
    pub state_hash_after: Option<String>,
    pub executed_at: Timestamp,
    pub executor_signature: String,
}
