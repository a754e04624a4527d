use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use hive_core::constants::{
    AGGREGATION_CACHE_TTL_SECS, MAX_EVIDENCE_JSON_LEN, MAX_METRICS_JSON_LEN,
    MAX_REVOCATION_REASON_LEN, RECENCY_DECAY_LAMBDA,
};
use hive_core::credential::{
    AggregatedReputation, Confidence, DidCredential, Outcome, ReputationTier,
};
use hive_core::types::{now_ts, PeerId, Timestamp};
use hive_core::HiveError;
use hive_identity::IdentityAdapter;
use hive_state::StateDb;
use hive_wire::message::DidCredentialRevokePayload;
use hive_wire::{did_credential_signing_payload, did_revoke_signing_payload};

use crate::profiles::{score_metrics, validate_metrics, VALID_DOMAINS};

/// DID credential issuance, verification, storage and reputation
/// aggregation. One per node; shares the state DB and identity adapter with
/// the rest of the core.
pub struct CredentialManager {
    db: Arc<StateDb>,
    identity: Arc<dyn IdentityAdapter>,
    our_pubkey: PeerId,
    /// In-memory aggregation cache keyed by `subject:domain`. The persisted
    /// mirror lives in the reputation_cache tree.
    cache: Mutex<HashMap<String, AggregatedReputation>>,
}

impl CredentialManager {
    pub fn new(db: Arc<StateDb>, identity: Arc<dyn IdentityAdapter>, our_pubkey: PeerId) -> Self {
        Self {
            db,
            identity,
            our_pubkey,
            cache: Mutex::new(HashMap::new()),
        }
    }

    // ── Issuance ─────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn issue_credential(
        &self,
        subject_id: PeerId,
        domain: &str,
        metrics: Map<String, Value>,
        outcome: Outcome,
        evidence: Vec<Value>,
        period_start: Option<Timestamp>,
        period_end: Option<Timestamp>,
        expires_at: Option<Timestamp>,
    ) -> Result<DidCredential, HiveError> {
        if subject_id == self.our_pubkey {
            return Err(HiveError::Validation("self-issuance rejected".into()));
        }
        if !VALID_DOMAINS.contains(&domain) {
            return Err(HiveError::Validation(format!("invalid domain: {domain}")));
        }
        validate_metrics(domain, &metrics).map_err(HiveError::Validation)?;

        let now = now_ts();
        let period_start = period_start.unwrap_or(now - 30 * 86_400);
        let period_end = period_end.unwrap_or(now);
        if period_end <= period_start {
            return Err(HiveError::Validation("period_end must be after period_start".into()));
        }

        let mut credential = DidCredential {
            credential_id: new_id(),
            issuer_id: self.our_pubkey.clone(),
            subject_id: subject_id.clone(),
            domain: domain.to_string(),
            period_start,
            period_end,
            metrics,
            outcome,
            evidence,
            signature: String::new(),
            issued_at: now,
            expires_at,
            revoked_at: None,
            revocation_reason: None,
            received_from: None,
        };

        let payload = did_credential_signing_payload(&credential);
        let signature = self.identity.sign(&payload).await;
        if signature.is_empty() {
            return Err(HiveError::Unavailable("HSM returned empty signature".into()));
        }
        credential.signature = signature;

        // Row caps are enforced by the store itself.
        self.db.store_did_credential(&credential)?;
        self.invalidate_cache(&subject_id);

        info!(
            credential_id = %&credential.credential_id[..8],
            subject = %subject_id.short(),
            domain,
            "issued credential"
        );
        Ok(credential)
    }

    // ── Verification ─────────────────────────────────────────────────────────

    /// The inverse of issuance: structural checks, profile validation, then
    /// signature recovery against the claimed issuer. Fail-closed.
    pub async fn verify_credential(&self, cred: &DidCredential) -> Result<(), HiveError> {
        if cred.issuer_id == cred.subject_id {
            return Err(HiveError::Validation("self-issuance rejected".into()));
        }
        if !VALID_DOMAINS.contains(&cred.domain.as_str()) {
            return Err(HiveError::Validation(format!("invalid domain: {}", cred.domain)));
        }
        validate_metrics(&cred.domain, &cred.metrics).map_err(HiveError::Validation)?;
        if cred.period_end <= cred.period_start {
            return Err(HiveError::Validation("period_end must be after period_start".into()));
        }
        let now = now_ts();
        if cred.expires_at.map_or(false, |e| e < now) {
            return Err(HiveError::Validation("credential expired".into()));
        }
        if cred.revoked_at.is_some() {
            return Err(HiveError::Validation("credential revoked".into()));
        }
        if cred.signature.is_empty() {
            return Err(HiveError::Signature("missing signature".into()));
        }

        let payload = did_credential_signing_payload(cred);
        if !self.identity.verify(&payload, &cred.signature, &cred.issuer_id).await {
            return Err(HiveError::Signature("signature verification failed".into()));
        }
        Ok(())
    }

    // ── Revocation ───────────────────────────────────────────────────────────

    /// Revoke a credential we issued. Returns the signed revocation payload
    /// suitable for broadcast.
    pub async fn revoke_credential(
        &self,
        credential_id: &str,
        reason: &str,
    ) -> Result<DidCredentialRevokePayload, HiveError> {
        if reason.is_empty() || reason.len() > MAX_REVOCATION_REASON_LEN {
            return Err(HiveError::Validation("invalid revocation reason length".into()));
        }
        let cred = self
            .db
            .get_did_credential(credential_id)?
            .ok_or_else(|| HiveError::Validation(format!("credential {credential_id} not found")))?;
        if cred.issuer_id != self.our_pubkey {
            return Err(HiveError::Authorization("only the issuer may revoke".into()));
        }
        if cred.revoked_at.is_some() {
            return Err(HiveError::Validation("credential already revoked".into()));
        }

        let payload = did_revoke_signing_payload(credential_id, reason);
        let signature = self.identity.sign(&payload).await;
        if signature.is_empty() {
            return Err(HiveError::Unavailable("HSM returned empty signature".into()));
        }

        self.db.revoke_did_credential(credential_id, reason, now_ts())?;
        self.invalidate_cache(&cred.subject_id);

        Ok(DidCredentialRevokePayload {
            credential_id: credential_id.to_string(),
            issuer_id: self.our_pubkey.clone(),
            reason: reason.to_string(),
            signature,
        })
    }

    // ── Incoming gossip ──────────────────────────────────────────────────────

    /// Handle an incoming credential presentation. Returns true when the
    /// credential is stored, or was already present (idempotent acknowledge).
    pub async fn handle_present(
        &self,
        peer_id: &PeerId,
        credential: &DidCredential,
    ) -> Result<bool, HiveError> {
        let metrics_len = serde_json::to_string(&credential.metrics)
            .map(|s| s.len())
            .unwrap_or(usize::MAX);
        if metrics_len > MAX_METRICS_JSON_LEN {
            return Err(HiveError::Validation("credential metrics too large".into()));
        }
        let evidence_len = serde_json::to_string(&credential.evidence)
            .map(|s| s.len())
            .unwrap_or(usize::MAX);
        if evidence_len > MAX_EVIDENCE_JSON_LEN {
            return Err(HiveError::Validation("credential evidence too large".into()));
        }

        self.verify_credential(credential).await?;

        if self.db.get_did_credential(&credential.credential_id)?.is_some() {
            return Ok(true); // already have it
        }

        let mut stored = credential.clone();
        stored.received_from = Some(peer_id.clone());
        let inserted = self.db.store_did_credential(&stored)?;
        if inserted {
            debug!(
                credential_id = %&credential.credential_id[..credential.credential_id.len().min(8)],
                from = %peer_id.short(),
                "stored credential"
            );
            self.invalidate_cache(&credential.subject_id);
        }
        Ok(inserted)
    }

    /// Handle an incoming revocation. Verified against the original issuer;
    /// already-revoked credentials acknowledge idempotently.
    pub async fn handle_revoke(
        &self,
        peer_id: &PeerId,
        payload: &DidCredentialRevokePayload,
    ) -> Result<bool, HiveError> {
        if payload.reason.is_empty() || payload.reason.len() > MAX_REVOCATION_REASON_LEN {
            return Err(HiveError::Validation("invalid revocation reason".into()));
        }
        let Some(cred) = self.db.get_did_credential(&payload.credential_id)? else {
            debug!(from = %peer_id.short(), "revocation for unknown credential");
            return Ok(false);
        };
        if cred.issuer_id != payload.issuer_id {
            return Err(HiveError::Validation("revocation issuer mismatch".into()));
        }
        if cred.revoked_at.is_some() {
            return Ok(true); // idempotent
        }

        let signing = did_revoke_signing_payload(&payload.credential_id, &payload.reason);
        if !self.identity.verify(&signing, &payload.signature, &payload.issuer_id).await {
            return Err(HiveError::Signature("revocation signature rejected".into()));
        }

        let revoked = self.db.revoke_did_credential(&payload.credential_id, &payload.reason, now_ts())?;
        if revoked {
            self.invalidate_cache(&cred.subject_id);
        }
        Ok(revoked)
    }

    // ── Aggregation ──────────────────────────────────────────────────────────

    /// Weighted reputation for a subject, optionally filtered by domain.
    /// None when the subject has no active credentials.
    pub fn aggregate_reputation(
        &self,
        subject_id: &PeerId,
        domain: Option<&str>,
    ) -> Result<Option<AggregatedReputation>, HiveError> {
        let cache_key = format!("{}:{}", subject_id.as_str(), domain.unwrap_or("_all"));
        let now = now_ts();

        if let Some(cached) = self.cache.lock().expect("cache lock").get(&cache_key) {
            if now - cached.computed_at < AGGREGATION_CACHE_TTL_SECS {
                return Ok(Some(cached.clone()));
            }
        }

        let credentials = self.db.get_did_credentials_for_subject(subject_id, domain)?;
        let active: Vec<_> = credentials.into_iter().filter(|c| c.is_active(now)).collect();
        if active.is_empty() {
            return Ok(None);
        }

        let mut total_weight = 0.0;
        let mut weighted_score_sum = 0.0;
        let mut issuers = HashSet::new();
        let mut components: HashMap<String, (f64, f64)> = HashMap::new();

        for cred in &active {
            let age_days = ((now - cred.issued_at).max(0)) as f64 / 86_400.0;
            let recency = (-RECENCY_DECAY_LAMBDA * age_days).exp();
            let issuer_weight = self.issuer_weight(&cred.issuer_id, subject_id);
            let evidence_strength = evidence_strength(&cred.evidence);

            let weight = issuer_weight * recency * evidence_strength;
            if weight <= 0.0 {
                continue;
            }

            let mut metric_score = score_metrics(&cred.domain, &cred.metrics);
            metric_score = match cred.outcome {
                Outcome::Renew => (metric_score * 1.1).min(100.0),
                Outcome::Revoke => (metric_score * 0.7).max(0.0),
                Outcome::Neutral => metric_score,
            };

            weighted_score_sum += weight * metric_score;
            total_weight += weight;
            issuers.insert(cred.issuer_id.clone());

            for (key, value) in &cred.metrics {
                if let Some(n) = value.as_f64() {
                    let entry = components.entry(key.clone()).or_insert((0.0, 0.0));
                    entry.0 += weight * n;
                    entry.1 += weight;
                }
            }
        }

        if total_weight <= 0.0 {
            return Ok(None);
        }

        let score = (weighted_score_sum / total_weight).round().clamp(0.0, 100.0) as u8;
        let mut component_avgs = Map::new();
        for (key, (sum, weight)) in components {
            if weight > 0.0 {
                let avg = (sum / weight * 10_000.0).round() / 10_000.0;
                component_avgs.insert(key, Value::from(avg));
            }
        }

        let result = AggregatedReputation {
            subject_id: subject_id.clone(),
            domain: domain.unwrap_or("_all").to_string(),
            score,
            tier: ReputationTier::from_score(score),
            confidence: Confidence::from_counts(active.len(), issuers.len()),
            credential_count: active.len(),
            issuer_count: issuers.len(),
            computed_at: now,
            components: component_avgs,
        };

        self.cache
            .lock()
            .expect("cache lock")
            .insert(cache_key, result.clone());
        self.db.put_reputation_cache(&result)?;

        Ok(Some(result))
    }

    /// Cross-domain reputation tier for a subject; newcomer when nothing is
    /// known.
    pub fn credit_tier(&self, subject_id: &PeerId) -> ReputationTier {
        match self.aggregate_reputation(subject_id, None) {
            Ok(Some(agg)) => agg.tier,
            _ => ReputationTier::Newcomer,
        }
    }

    fn invalidate_cache(&self, subject_id: &PeerId) {
        let prefix = format!("{}:", subject_id.as_str());
        self.cache
            .lock()
            .expect("cache lock")
            .retain(|k, _| !k.starts_with(&prefix));
        if let Err(e) = self.db.remove_reputation_cache(subject_id) {
            warn!(error = %e, "failed to invalidate persisted reputation cache");
        }
    }

    /// Both issuer and subject being members is the strongest signal (2.0);
    /// a member issuer alone is moderate (1.5); anything else is baseline.
    fn issuer_weight(&self, issuer: &PeerId, subject: &PeerId) -> f64 {
        let issuer_is_member = self.db.member_exists(issuer);
        let subject_is_member = self.db.member_exists(subject);
        if issuer_is_member && subject_is_member {
            2.0
        } else if issuer_is_member {
            1.5
        } else {
            1.0
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Remove expired credentials. Returns the count removed.
    pub fn cleanup_expired(&self) -> Result<usize, HiveError> {
        let removed = self.db.cleanup_expired_did_credentials(now_ts())?;
        if removed > 0 {
            info!(removed, "cleaned up expired credentials");
        }
        Ok(removed)
    }

    /// Recompute persisted aggregations older than the cache TTL, bounded
    /// per sweep so the ticker stays responsive.
    pub fn refresh_stale_aggregations(&self) -> Result<usize, HiveError> {
        let cutoff = now_ts() - AGGREGATION_CACHE_TTL_SECS;
        let stale = self.db.get_stale_reputation_cache(cutoff, 50)?;
        let mut refreshed = 0;
        for entry in stale {
            // Drop the in-memory entry so aggregate recomputes.
            self.invalidate_cache(&entry.subject_id);
            let domain = if entry.domain == "_all" { None } else { Some(entry.domain.as_str()) };
            if self.aggregate_reputation(&entry.subject_id, domain)?.is_some() {
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// Active credentials we issued, suitable for periodic re-gossip.
    pub fn credentials_for_relay(&self) -> Result<Vec<DidCredential>, HiveError> {
        let now = now_ts();
        Ok(self
            .db
            .get_did_credentials_by_issuer(&self.our_pubkey, 100)?
            .into_iter()
            .filter(|c| c.is_active(now))
            .collect())
    }
}

/// ×0.3 with no evidence, ×0.7 with 1-4 refs, ×1.0 with 5 or more.
fn evidence_strength(evidence: &[Value]) -> f64 {
    match evidence.len() {
        0 => 0.3,
        1..=4 => 0.7,
        _ => 1.0,
    }
}

fn new_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
