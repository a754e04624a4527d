use serde::{Deserialize, Serialize};

use crate::types::{PeerId, Sats, Timestamp};

/// Membership tier inside the hive. Orthogonal to the reputation tier: this
/// one is granted, the other is earned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberTier {
    Neophyte,
    Member,
    Advanced,
    Admin,
}

/// A hive member. Created on a verified HELLO, mutated by liveness updates,
/// destroyed only by explicit eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    pub peer_id: PeerId,
    pub tier: MemberTier,
    pub joined_at: Timestamp,
    pub last_seen: Timestamp,
    /// Fraction in [0,1] derived from presence sampling.
    pub uptime_pct: f64,
    pub active: bool,
}

impl MemberRecord {
    pub fn new(peer_id: PeerId, now: Timestamp) -> Self {
        Self {
            peer_id,
            tier: MemberTier::Neophyte,
            joined_at: now,
            last_seen: now,
            uptime_pct: 1.0,
            active: true,
        }
    }

    /// Uptime as the integer percent used in settlement hashing.
    pub fn uptime_int_pct(&self) -> u32 {
        (self.uptime_pct.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

/// Best-effort cache of a peer's gossiped state. The persisted fee-report
/// stream, not this snapshot, is authoritative for settlement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerStateSnapshot {
    pub peer_id: Option<PeerId>,
    pub capacity_sats: Sats,
    pub forward_count: u64,
    pub fees_earned_sats: Sats,
    pub rebalance_costs_sats: Sats,
    pub last_snapshot_ts: Timestamp,
}

/// A persisted fee report for one peer and one settlement period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeReport {
    pub peer_id: PeerId,
    /// ISO year-week, e.g. "2026-31".
    pub period: String,
    pub fees_earned_sats: Sats,
    pub forward_count: u64,
    pub rebalance_costs_sats: Sats,
    pub reported_at: Timestamp,
}

/// One peer's signed view of another peer, gossiped for fleet-wide
/// cross-checks (centrality feeds the network-optimized fair share).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerReputationReport {
    pub reporter_id: PeerId,
    pub subject_id: PeerId,
    pub htlc_success_rate: f64,
    pub avg_response_ms: u32,
    pub centrality: f64,
    pub warnings: Vec<String>,
    pub reported_at: Timestamp,
}
