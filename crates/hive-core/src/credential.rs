use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::types::{PeerId, Timestamp};

/// Outcome recommendation carried by a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Renew,
    Revoke,
    Neutral,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Renew => "renew",
            Outcome::Revoke => "revoke",
            Outcome::Neutral => "neutral",
        }
    }
}

/// Reputation tier derived from the 0-100 aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationTier {
    Newcomer,
    Recognized,
    Trusted,
    Senior,
}

impl ReputationTier {
    pub fn from_score(score: u8) -> Self {
        use crate::constants::*;
        if score <= TIER_NEWCOMER_MAX {
            ReputationTier::Newcomer
        } else if score <= TIER_RECOGNIZED_MAX {
            ReputationTier::Recognized
        } else if score <= TIER_TRUSTED_MAX {
            ReputationTier::Trusted
        } else {
            ReputationTier::Senior
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReputationTier::Newcomer => "newcomer",
            ReputationTier::Recognized => "recognized",
            ReputationTier::Trusted => "trusted",
            ReputationTier::Senior => "senior",
        }
    }
}

impl fmt::Display for ReputationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// high needs ≥5 issuers and ≥10 credentials; medium ≥2 and ≥3.
    pub fn from_counts(credential_count: usize, issuer_count: usize) -> Self {
        if issuer_count >= 5 && credential_count >= 10 {
            Confidence::High
        } else if issuer_count >= 2 && credential_count >= 3 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// A DID reputation credential: a signed statement by `issuer_id` about
/// `subject_id` within `domain`.
///
/// Invariants (checked at issuance and on receipt): issuer ≠ subject,
/// period_end > period_start, metrics conform to the domain profile, and
/// once `revoked_at` is set it never clears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidCredential {
    pub credential_id: String,
    pub issuer_id: PeerId,
    pub subject_id: PeerId,
    pub domain: String,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub metrics: Map<String, Value>,
    pub outcome: Outcome,
    #[serde(default)]
    pub evidence: Vec<Value>,
    pub signature: String,
    pub issued_at: Timestamp,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub revoked_at: Option<Timestamp>,
    #[serde(default)]
    pub revocation_reason: Option<String>,
    /// Peer that relayed the credential to us; None if we issued it.
    #[serde(default)]
    pub received_from: Option<PeerId>,
}

impl DidCredential {
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |e| e >= now)
    }
}

/// Cached weighted aggregation over a subject's active credentials.
/// Derived data: invalidated whenever the underlying set changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedReputation {
    pub subject_id: PeerId,
    /// Domain filter, or "_all" for the cross-domain aggregate.
    pub domain: String,
    pub score: u8,
    pub tier: ReputationTier,
    pub confidence: Confidence,
    pub credential_count: usize,
    pub issuer_count: usize,
    pub computed_at: Timestamp,
    /// Weighted per-metric averages, for operator introspection.
    pub components: Map<String, Value>,
}
