use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use hive_core::constants::{
    MAX_ALLOWED_SCHEMAS_LEN, MAX_CONSTRAINTS_LEN, MAX_CREDENTIAL_VALID_DAYS,
    MAX_REVOCATION_REASON_LEN, MGMT_PRESENTS_PER_PEER_PER_HOUR, MGMT_REVOKES_PER_PEER_PER_HOUR,
};
use hive_core::mgmt::{ManagementCredential, ManagementReceipt, PermissionTier};
use hive_core::ratelimit::SlidingWindowLimiter;
use hive_core::types::{now_ts, PeerId, Timestamp};
use hive_core::HiveError;
use hive_identity::IdentityAdapter;
use hive_state::StateDb;
use hive_wire::message::MgmtCredentialRevokePayload;
use hive_wire::{
    mgmt_credential_signing_payload, mgmt_revoke_signing_payload, receipt_signing_payload,
};

use crate::registry::{get_action, get_schema, schema_matches};

/// Management credential lifecycle and receipt recording.
///
/// Incoming credential traffic is rate limited per peer and verified
/// fail-closed: a missing signature, an unavailable signer, or a recovered
/// pubkey that is not the claimed issuer all reject the message.
pub struct ManagementManager {
    db: Arc<StateDb>,
    identity: Arc<dyn IdentityAdapter>,
    our_pubkey: PeerId,
    limiter: SlidingWindowLimiter,
}

impl ManagementManager {
    pub fn new(db: Arc<StateDb>, identity: Arc<dyn IdentityAdapter>, our_pubkey: PeerId) -> Self {
        Self {
            db,
            identity,
            our_pubkey,
            limiter: SlidingWindowLimiter::hourly(),
        }
    }

    // ── Issuance ─────────────────────────────────────────────────────────────

    pub async fn issue_credential(
        &self,
        agent_id: PeerId,
        node_id: PeerId,
        tier: PermissionTier,
        allowed_schemas: Vec<String>,
        constraints: Value,
        valid_days: i64,
    ) -> Result<ManagementCredential, HiveError> {
        if agent_id == self.our_pubkey {
            return Err(HiveError::Validation("cannot issue credential to self".into()));
        }
        if valid_days <= 0 || valid_days > MAX_CREDENTIAL_VALID_DAYS {
            return Err(HiveError::Validation(format!(
                "valid_days must be in 1..={MAX_CREDENTIAL_VALID_DAYS}"
            )));
        }
        self.check_patterns(&allowed_schemas)?;

        let schemas_json = serde_json::to_string(&allowed_schemas)
            .map_err(|e| HiveError::Serialization(e.to_string()))?;
        if schemas_json.len() > MAX_ALLOWED_SCHEMAS_LEN {
            return Err(HiveError::Validation("allowed_schemas too large".into()));
        }
        let constraints_json = serde_json::to_string(&constraints)
            .map_err(|e| HiveError::Serialization(e.to_string()))?;
        if constraints_json.len() > MAX_CONSTRAINTS_LEN {
            return Err(HiveError::Validation("constraints too large".into()));
        }

        let now = now_ts();
        let mut credential = ManagementCredential::new(
            new_id(),
            self.our_pubkey.clone(),
            agent_id.clone(),
            node_id,
            tier,
            allowed_schemas,
            constraints,
            now,
            now + valid_days * 86_400,
            String::new(),
        )?;

        let payload = mgmt_credential_signing_payload(&credential);
        let signature = self.identity.sign(&payload).await;
        if signature.is_empty() {
            return Err(HiveError::Unavailable("HSM returned empty signature".into()));
        }
        credential.signature = signature;

        self.db.store_mgmt_credential(&credential)?;
        info!(
            credential_id = %&credential.credential_id[..8],
            agent = %agent_id.short(),
            tier = tier.as_str(),
            "issued management credential"
        );
        Ok(credential)
    }

    /// Every allowlist pattern must resolve against the registry; a grant
    /// that can never match anything is a configuration mistake.
    fn check_patterns(&self, patterns: &[String]) -> Result<(), HiveError> {
        for pattern in patterns {
            if pattern == "*" {
                continue;
            }
            let resolves = if pattern.ends_with("/*") {
                crate::registry::list_schemas()
                    .iter()
                    .any(|c| schema_matches(pattern, c.schema_id))
            } else {
                get_schema(pattern).is_some()
            };
            if !resolves {
                return Err(HiveError::Validation(format!(
                    "allowed_schemas pattern '{pattern}' matches no known schema"
                )));
            }
        }
        Ok(())
    }

    // ── Revocation ───────────────────────────────────────────────────────────

    pub async fn revoke_credential(
        &self,
        credential_id: &str,
        reason: &str,
    ) -> Result<MgmtCredentialRevokePayload, HiveError> {
        if reason.is_empty() || reason.len() > MAX_REVOCATION_REASON_LEN {
            return Err(HiveError::Validation("invalid revocation reason".into()));
        }
        let cred = self
            .db
            .get_mgmt_credential(credential_id)?
            .ok_or_else(|| HiveError::Validation(format!("credential {credential_id} not found")))?;
        if cred.issuer_id != self.our_pubkey {
            return Err(HiveError::Authorization("only the issuer may revoke".into()));
        }
        if cred.revoked_at.is_some() {
            return Err(HiveError::Validation("credential already revoked".into()));
        }

        let payload = mgmt_revoke_signing_payload(credential_id, reason);
        let signature = self.identity.sign(&payload).await;
        if signature.is_empty() {
            return Err(HiveError::Unavailable("HSM returned empty signature".into()));
        }

        self.db.revoke_mgmt_credential(credential_id, now_ts())?;
        Ok(MgmtCredentialRevokePayload {
            credential_id: credential_id.to_string(),
            issuer_id: self.our_pubkey.clone(),
            reason: reason.to_string(),
            signature,
        })
    }

    // ── Incoming gossip ──────────────────────────────────────────────────────

    pub async fn handle_present(
        &self,
        peer_id: &PeerId,
        credential: &ManagementCredential,
    ) -> Result<bool, HiveError> {
        if !self.limiter.allow(
            peer_id,
            "mgmt_credential_present",
            MGMT_PRESENTS_PER_PEER_PER_HOUR,
            now_ts(),
        ) {
            return Err(HiveError::Validation(format!(
                "rate limit exceeded for credential presents from {}",
                peer_id.short()
            )));
        }

        // Structural invariants travel with the record; rebuild through the
        // validated constructor so a malformed credential never lands.
        let candidate = ManagementCredential::new(
            credential.credential_id.clone(),
            credential.issuer_id.clone(),
            credential.agent_id.clone(),
            credential.node_id.clone(),
            credential.tier,
            credential.allowed_schemas.clone(),
            credential.constraints.clone(),
            credential.valid_from,
            credential.valid_until,
            credential.signature.clone(),
        )?;

        let now = now_ts();
        if candidate.valid_until < now {
            return Err(HiveError::Validation("management credential expired".into()));
        }
        if candidate.signature.is_empty() {
            return Err(HiveError::Signature("missing signature".into()));
        }

        let payload = mgmt_credential_signing_payload(&candidate);
        if !self
            .identity
            .verify(&payload, &candidate.signature, &candidate.issuer_id)
            .await
        {
            return Err(HiveError::Signature("issuer signature rejected".into()));
        }

        if self.db.get_mgmt_credential(&candidate.credential_id)?.is_some() {
            return Ok(true); // idempotent
        }
        let stored = self.db.store_mgmt_credential(&candidate)?;
        if stored {
            debug!(
                credential_id = %&candidate.credential_id[..candidate.credential_id.len().min(8)],
                from = %peer_id.short(),
                "stored management credential"
            );
        }
        Ok(stored)
    }

    pub async fn handle_revoke(
        &self,
        peer_id: &PeerId,
        payload: &MgmtCredentialRevokePayload,
    ) -> Result<bool, HiveError> {
        if !self.limiter.allow(
            peer_id,
            "mgmt_credential_revoke",
            MGMT_REVOKES_PER_PEER_PER_HOUR,
            now_ts(),
        ) {
            return Err(HiveError::Validation(format!(
                "rate limit exceeded for credential revokes from {}",
                peer_id.short()
            )));
        }
        if payload.reason.is_empty() || payload.reason.len() > MAX_REVOCATION_REASON_LEN {
            return Err(HiveError::Validation("invalid revocation reason".into()));
        }
        let Some(cred) = self.db.get_mgmt_credential(&payload.credential_id)? else {
            debug!(from = %peer_id.short(), "revocation for unknown management credential");
            return Ok(false);
        };
        if cred.issuer_id != payload.issuer_id {
            return Err(HiveError::Validation("revocation issuer mismatch".into()));
        }
        if cred.revoked_at.is_some() {
            return Ok(true); // idempotent
        }
        if payload.signature.is_empty() {
            return Err(HiveError::Signature("missing revocation signature".into()));
        }

        let signing = mgmt_revoke_signing_payload(&payload.credential_id, &payload.reason);
        if !self.identity.verify(&signing, &payload.signature, &payload.issuer_id).await {
            return Err(HiveError::Signature("revocation signature rejected".into()));
        }

        self.db.revoke_mgmt_credential(&payload.credential_id, now_ts())
    }

    // ── Receipts ─────────────────────────────────────────────────────────────

    /// Record a signed receipt for an executed action. Orphan receipts
    /// (unknown or revoked credential) are rejected before storage; unsigned
    /// receipts are never stored.
    pub async fn record_receipt(
        &self,
        credential_id: &str,
        schema_id: &str,
        action: &str,
        params: Value,
        result: Option<Value>,
        state_hash_before: Option<String>,
        state_hash_after: Option<String>,
    ) -> Result<String, HiveError> {
        let cred = self
            .db
            .get_mgmt_credential(credential_id)?
            .ok_or_else(|| {
                HiveError::Validation(format!("receipt references unknown credential {credential_id}"))
            })?;
        if cred.revoked_at.is_some() {
            return Err(HiveError::Validation(
                "receipt references revoked credential".into(),
            ));
        }
        let danger = get_action(schema_id, action)
            .map(|a| a.danger.total())
            .ok_or_else(|| HiveError::Validation(format!("unknown action {schema_id}/{action}")))?;

        let mut receipt = ManagementReceipt {
            receipt_id: new_id(),
            credential_id: credential_id.to_string(),
            schema_id: schema_id.to_string(),
            action: action.to_string(),
            params,
            danger_score: danger,
            result,
            state_hash_before,
            state_hash_after,
            executed_at: now_ts(),
            executor_signature: String::new(),
        };

        let payload = receipt_signing_payload(&receipt);
        let signature = self.identity.sign(&payload).await;
        if signature.is_empty() {
            warn!("receipt signing failed, receipt not stored");
            return Err(HiveError::Unavailable("receipt signing failed".into()));
        }
        receipt.executor_signature = signature;

        self.db.store_mgmt_receipt(&receipt)?;
        Ok(receipt.receipt_id)
    }

    pub fn list_credentials(
        &self,
        agent: Option<&PeerId>,
        node: Option<&PeerId>,
    ) -> Result<Vec<ManagementCredential>, HiveError> {
        self.db.list_mgmt_credentials(agent, node)
    }

    pub fn get_credential(&self, credential_id: &str) -> Result<Option<ManagementCredential>, HiveError> {
        self.db.get_mgmt_credential(credential_id)
    }

    /// Authorization entry point used by the RPC surface: verify the stored
    /// credential still authorizes the action at `now`.
    pub fn authorize(
        &self,
        credential_id: &str,
        schema_id: &str,
        action: &str,
        now: Timestamp,
    ) -> Result<ManagementCredential, HiveError> {
        let cred = self
            .db
            .get_mgmt_credential(credential_id)?
            .ok_or_else(|| HiveError::Authorization("unknown credential".into()))?;
        crate::registry::check_authorization(&cred, schema_id, action, now)
            .map_err(HiveError::Authorization)?;
        Ok(cred)
    }
}

fn new_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
