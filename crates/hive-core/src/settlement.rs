use serde::{Deserialize, Serialize};

use crate::types::{PeerId, Sats, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Ready,
    Completed,
    Failed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Ready => "ready",
            ProposalStatus::Completed => "completed",
            ProposalStatus::Failed => "failed",
        }
    }
}

/// One member's contribution metrics for a settlement period. This is the
/// canonical snapshot that every node hashes; field formatting is fixed by
/// the data-hash contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberContribution {
    pub peer_id: PeerId,
    pub fees_earned: Sats,
    pub rebalance_costs: Sats,
    pub capacity: Sats,
    /// Integer percent 0-100 (canonicalized before hashing).
    pub uptime: u32,
    /// Routing activity metric: forward count from gossip, not sats volume.
    pub forward_count: u64,
    pub reputation_tier: String,
    /// Fleet-centrality in [0,1]; only consulted in network-optimized mode.
    #[serde(default)]
    pub centrality: f64,
}

impl MemberContribution {
    /// Net profit, floored at 0. Heavy rebalancers never contribute negative.
    pub fn net_profit_sats(&self) -> Sats {
        self.fees_earned.saturating_sub(self.rebalance_costs)
    }
}

/// Result of the fair-share computation for one member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    pub peer_id: PeerId,
    pub fees_earned: Sats,
    pub rebalance_costs: Sats,
    pub net_profit: Sats,
    pub fair_share: Sats,
    /// Positive = member is owed; negative = member owes.
    pub balance: i64,
    #[serde(default)]
    pub network_score: f64,
    #[serde(default)]
    pub network_bonus_sats: Sats,
}

/// One planned transfer inside a settlement plan. Ordering inside the plan
/// hash is `(from, to, amount)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPayment {
    pub from_peer: PeerId,
    pub to_peer: PeerId,
    pub amount_sats: Sats,
}

/// A distributed settlement proposal for one ISO year-week period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementProposal {
    pub proposal_id: String,
    /// ISO year-week, e.g. "2026-31".
    pub period: String,
    pub proposer_peer_id: PeerId,
    pub data_hash: String,
    pub plan_hash: String,
    pub total_fees_sats: Sats,
    pub member_count: usize,
    /// Canonical contributions snapshot, kept for rebroadcast and for
    /// validating executions after restart.
    pub contributions: Vec<MemberContribution>,
    pub status: ProposalStatus,
    pub created_at: Timestamp,
}

/// A signed settlement-ready vote. At most one per `(proposal, voter)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyVote {
    pub proposal_id: String,
    pub voter_peer_id: PeerId,
    pub data_hash: String,
    pub signature: String,
    pub voted_at: Timestamp,
}

/// A signed settlement execution. At most one per `(proposal, executor)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementExecution {
    pub proposal_id: String,
    pub executor_peer_id: PeerId,
    pub plan_hash: String,
    pub amount_paid_sats: Sats,
    #[serde(default)]
    pub payment_hash: Option<String>,
    pub signature: String,
    pub executed_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubPaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// Per-transfer persistence for crash-safe idempotent retry: a completed
/// sub-payment is never paid twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPayment {
    pub proposal_id: String,
    pub from_peer: PeerId,
    pub to_peer: PeerId,
    pub amount_sats: Sats,
    pub payment_hash: String,
    pub status: SubPaymentStatus,
    pub updated_at: Timestamp,
}

/// A registered BOLT12 offer through which a member receives settlement
/// payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementOffer {
    pub peer_id: PeerId,
    pub bolt12_offer: String,
    pub registered_at: Timestamp,
    pub active: bool,
}

/// Record of a fully settled period; blocks re-proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledPeriod {
    pub period: String,
    pub proposal_id: String,
    pub total_distributed_sats: Sats,
    pub settled_at: Timestamp,
}
