use std::sync::Arc;

use tracing::{debug, info, warn};

use hive_core::settlement::{
    MemberContribution, ProposalStatus, ReadyVote, SettledPeriod, SettlementExecution,
    SettlementOffer, SettlementProposal, SubPayment, SubPaymentStatus,
};
use hive_core::types::{now_ts, PeerId, Sats};
use hive_core::HiveError;
use hive_identity::IdentityAdapter;
use hive_lightning::LightningRpc;
use hive_reputation::CredentialManager;
use hive_state::StateDb;
use hive_wire::message::{
    SettlementExecutePayload, SettlementProposePayload, SettlementReadyPayload,
};
use hive_wire::{settlement_executed_signing_payload, settlement_ready_signing_payload};

use crate::plan::compute_settlement_plan;

/// Distributed settlement coordinator for this node.
///
/// Drives the proposal lifecycle `pending → ready → completed`: proposing
/// for closed periods, independently verifying and voting on peers'
/// proposals, executing our own planned transfers with crash-safe
/// sub-payment persistence, and completing once every payer has confirmed.
pub struct SettlementEngine {
    db: Arc<StateDb>,
    identity: Arc<dyn IdentityAdapter>,
    lightning: Arc<dyn LightningRpc>,
    reputation: Arc<CredentialManager>,
    our_pubkey: PeerId,
}

impl SettlementEngine {
    pub fn new(
        db: Arc<StateDb>,
        identity: Arc<dyn IdentityAdapter>,
        lightning: Arc<dyn LightningRpc>,
        reputation: Arc<CredentialManager>,
        our_pubkey: PeerId,
    ) -> Self {
        Self { db, identity, lightning, reputation, our_pubkey }
    }

    // ── BOLT12 offers ────────────────────────────────────────────────────────

    /// Register a member's BOLT12 offer for receiving settlement payments.
    pub fn register_offer(&self, peer_id: PeerId, bolt12_offer: &str) -> Result<(), HiveError> {
        if !bolt12_offer.starts_with("lno1") {
            return Err(HiveError::Validation(
                "invalid BOLT12 offer format (must start with lno1)".into(),
            ));
        }
        self.db.put_settlement_offer(&SettlementOffer {
            peer_id,
            bolt12_offer: bolt12_offer.to_string(),
            registered_at: now_ts(),
            active: true,
        })
    }

    /// Generate and register our own settlement offer if none exists yet.
    /// Called on join so the node can receive payouts from the start.
    pub async fn ensure_own_offer(&self) -> Result<Option<String>, HiveError> {
        if let Some(existing) = self.db.get_settlement_offer(&self.our_pubkey)? {
            if existing.active {
                return Ok(None);
            }
        }
        let offer = self.lightning.offer("any", "hive settlement").await?;
        self.register_offer(self.our_pubkey.clone(), &offer.bolt12)?;
        info!("auto-registered settlement offer");
        Ok(Some(offer.bolt12))
    }

    fn active_offer(&self, peer: &PeerId) -> Result<Option<String>, HiveError> {
        Ok(self
            .db
            .get_settlement_offer(peer)?
            .filter(|o| o.active)
            .map(|o| o.bolt12_offer))
    }

    // ── Contributions ────────────────────────────────────────────────────────

    /// Refresh our own counters from the node's settled forwards so the
    /// gossip tick and fee reports carry real numbers.
    pub async fn refresh_local_snapshot(&self) -> Result<(), HiveError> {
        let forwards = self.lightning.listforwards(Some("settled")).await?;
        let fees_msat: u64 = forwards.iter().map(|f| f.fee_msat).sum();
        let mut snapshot = self.db.get_peer_state(&self.our_pubkey)?.unwrap_or_default();
        snapshot.peer_id = Some(self.our_pubkey.clone());
        snapshot.forward_count = forwards.len() as u64;
        snapshot.fees_earned_sats = fees_msat / 1000;
        snapshot.last_snapshot_ts = now_ts();
        self.db.put_peer_state(&self.our_pubkey, &snapshot)
    }

    /// Gather the canonical contributions snapshot for a period. Persisted
    /// fee reports are authoritative; the in-memory peer state cache is the
    /// fallback for peers whose report never arrived.
    pub fn gather_contributions(&self, period: &str) -> Result<Vec<MemberContribution>, HiveError> {
        let members = self.db.iter_members()?;
        let mut contributions = Vec::with_capacity(members.len());

        for member in members {
            let peer_id = member.peer_id.clone();
            let snapshot = self.db.get_peer_state(&peer_id)?.unwrap_or_default();

            let (fees_earned, forward_count, rebalance_costs) =
                match self.db.get_fee_report(period, &peer_id)? {
                    Some(report) => (
                        report.fees_earned_sats,
                        report.forward_count,
                        report.rebalance_costs_sats,
                    ),
                    None => (
                        snapshot.fees_earned_sats,
                        snapshot.forward_count,
                        snapshot.rebalance_costs_sats,
                    ),
                };

            let reports = self.db.get_peer_reputation_reports(&peer_id)?;
            let centrality = if reports.is_empty() {
                0.0
            } else {
                reports.iter().map(|r| r.centrality).sum::<f64>() / reports.len() as f64
            };

            contributions.push(MemberContribution {
                peer_id: peer_id.clone(),
                fees_earned,
                rebalance_costs,
                capacity: snapshot.capacity_sats,
                uptime: member.uptime_int_pct(),
                forward_count,
                reputation_tier: self.reputation.credit_tier(&peer_id).as_str().to_string(),
                centrality,
            });
        }

        contributions.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        Ok(contributions)
    }

    // ── Propose ──────────────────────────────────────────────────────────────

    /// Create a settlement proposal for `period`. Returns the broadcastable
    /// payload, or None when the period is already proposed, already
    /// settled, has no members, or earned zero fees.
    pub fn propose(&self, period: &str) -> Result<Option<SettlementProposePayload>, HiveError> {
        if self.db.get_settlement_proposal_by_period(period)?.is_some() {
            debug!(period, "settlement proposal already exists");
            return Ok(None);
        }
        if self.db.is_period_settled(period) {
            debug!(period, "period already settled");
            return Ok(None);
        }

        let contributions = self.gather_contributions(period)?;
        if contributions.is_empty() {
            debug!(period, "no contributions to settle");
            return Ok(None);
        }

        let plan = compute_settlement_plan(period, &contributions);
        // Zero-fee periods add noise to participation metrics and produce
        // "successful" settlements with no economic transfer.
        if plan.total_fees_sats == 0 {
            debug!(period, "skipping settlement proposal: zero fees");
            return Ok(None);
        }

        let proposal = SettlementProposal {
            proposal_id: new_id(),
            period: period.to_string(),
            proposer_peer_id: self.our_pubkey.clone(),
            data_hash: plan.data_hash.clone(),
            plan_hash: plan.plan_hash.clone(),
            total_fees_sats: plan.total_fees_sats,
            member_count: contributions.len(),
            contributions: contributions.clone(),
            status: ProposalStatus::Pending,
            created_at: now_ts(),
        };
        if !self.db.add_settlement_proposal(&proposal)? {
            return Ok(None);
        }

        info!(
            proposal_id = %&proposal.proposal_id[..8],
            period,
            total_fees = plan.total_fees_sats,
            members = proposal.member_count,
            "created settlement proposal"
        );

        Ok(Some(SettlementProposePayload {
            proposal_id: proposal.proposal_id,
            period: period.to_string(),
            proposer_peer_id: self.our_pubkey.clone(),
            data_hash: plan.data_hash,
            plan_hash: plan.plan_hash,
            total_fees_sats: plan.total_fees_sats,
            member_count: contributions.len(),
            contributions,
            ts: now_ts(),
        }))
    }

    // ── Verify & vote ────────────────────────────────────────────────────────

    /// Independently recompute both hashes for a proposal and vote when they
    /// match. `skip_hash_verify` is the proposer's own auto-vote, where the
    /// data was computed moments ago.
    pub async fn verify_and_vote(
        &self,
        proposal: &SettlementProposePayload,
        skip_hash_verify: bool,
    ) -> Result<Option<SettlementReadyPayload>, HiveError> {
        if self.db.has_ready_vote(&proposal.proposal_id, &self.our_pubkey) {
            return Ok(None);
        }
        if self.db.is_period_settled(&proposal.period) {
            return Ok(None);
        }
        // First proposal per period wins; never split votes across rivals.
        if let Some(stored) = self.db.get_settlement_proposal_by_period(&proposal.period)? {
            if stored.proposal_id != proposal.proposal_id {
                debug!(period = %proposal.period, "competing proposal ignored");
                return Ok(None);
            }
        }

        let data_hash_for_vote = if skip_hash_verify {
            proposal.data_hash.clone()
        } else {
            let our_contributions = self.gather_contributions(&proposal.period)?;
            let our_plan = compute_settlement_plan(&proposal.period, &our_contributions);

            if our_plan.data_hash != proposal.data_hash {
                warn!(
                    proposal_id = %&proposal.proposal_id[..proposal.proposal_id.len().min(8)],
                    "data hash mismatch, not voting"
                );
                return Ok(None);
            }
            if proposal.plan_hash.len() != 64 {
                warn!("missing or malformed plan_hash on proposal, not voting");
                return Ok(None);
            }
            if our_plan.plan_hash != proposal.plan_hash {
                warn!(
                    proposal_id = %&proposal.proposal_id[..proposal.proposal_id.len().min(8)],
                    "plan hash mismatch, not voting"
                );
                return Ok(None);
            }
            our_plan.data_hash
        };

        let ts = now_ts();
        let signing = settlement_ready_signing_payload(
            &proposal.proposal_id,
            &self.our_pubkey,
            &data_hash_for_vote,
            ts,
        );
        let signature = self.identity.sign(&signing).await;
        if signature.is_empty() {
            warn!("failed to sign settlement vote");
            return Ok(None);
        }

        let vote = ReadyVote {
            proposal_id: proposal.proposal_id.clone(),
            voter_peer_id: self.our_pubkey.clone(),
            data_hash: data_hash_for_vote.clone(),
            signature: signature.clone(),
            voted_at: ts,
        };
        if !self.db.add_ready_vote(&vote)? {
            return Ok(None);
        }

        self.check_quorum(&proposal.proposal_id)?;

        Ok(Some(SettlementReadyPayload {
            proposal_id: proposal.proposal_id.clone(),
            voter_peer_id: self.our_pubkey.clone(),
            data_hash: data_hash_for_vote,
            ts,
            signature,
        }))
    }

    // ── Inbound handlers ─────────────────────────────────────────────────────

    /// Store a peer's proposal (first one per period wins) and vote when our
    /// independent computation matches. Returns our vote for broadcast.
    pub async fn handle_propose(
        &self,
        sender: &PeerId,
        payload: &SettlementProposePayload,
    ) -> Result<Option<SettlementReadyPayload>, HiveError> {
        if payload.plan_hash.len() != 64 || payload.data_hash.len() != 64 {
            return Err(HiveError::Validation("malformed proposal hashes".into()));
        }

        if self.db.get_settlement_proposal_by_period(&payload.period)?.is_none() {
            let proposal = SettlementProposal {
                proposal_id: payload.proposal_id.clone(),
                period: payload.period.clone(),
                proposer_peer_id: payload.proposer_peer_id.clone(),
                data_hash: payload.data_hash.clone(),
                plan_hash: payload.plan_hash.clone(),
                total_fees_sats: payload.total_fees_sats,
                member_count: payload.member_count,
                contributions: payload.contributions.clone(),
                status: ProposalStatus::Pending,
                created_at: now_ts(),
            };
            self.db.add_settlement_proposal(&proposal)?;
            debug!(
                proposal_id = %&payload.proposal_id[..payload.proposal_id.len().min(8)],
                from = %sender.short(),
                "stored settlement proposal"
            );
        }

        self.verify_and_vote(payload, false).await
    }

    /// Record a peer's ready vote. The vote must reference a known proposal,
    /// carry its exact data hash, and verify under the voter's key.
    /// Mismatched votes are dropped, not reshaped.
    pub async fn handle_ready(
        &self,
        _sender: &PeerId,
        payload: &SettlementReadyPayload,
    ) -> Result<bool, HiveError> {
        let Some(proposal) = self.db.get_settlement_proposal(&payload.proposal_id)? else {
            debug!("vote for unknown proposal");
            return Ok(false);
        };
        if payload.data_hash != proposal.data_hash {
            return Err(HiveError::Validation("vote data hash mismatch".into()));
        }

        let signing = settlement_ready_signing_payload(
            &payload.proposal_id,
            &payload.voter_peer_id,
            &payload.data_hash,
            payload.ts,
        );
        if !self.identity.verify(&signing, &payload.signature, &payload.voter_peer_id).await {
            return Err(HiveError::Signature("vote signature rejected".into()));
        }

        let vote = ReadyVote {
            proposal_id: payload.proposal_id.clone(),
            voter_peer_id: payload.voter_peer_id.clone(),
            data_hash: payload.data_hash.clone(),
            signature: payload.signature.clone(),
            voted_at: payload.ts,
        };
        // Duplicate votes per voter are rejected idempotently.
        if !self.db.add_ready_vote(&vote)? {
            return Ok(true);
        }

        self.check_quorum(&payload.proposal_id)?;
        Ok(true)
    }

    /// Quorum = ⌊member_count / 2⌋ + 1. On reaching it, a pending proposal
    /// transitions to ready.
    pub fn check_quorum(&self, proposal_id: &str) -> Result<bool, HiveError> {
        let Some(mut proposal) = self.db.get_settlement_proposal(proposal_id)? else {
            return Ok(false);
        };
        let votes = self.db.count_ready_votes(proposal_id)?;
        let quorum = proposal.member_count / 2 + 1;

        if votes >= quorum && proposal.status == ProposalStatus::Pending {
            proposal.status = ProposalStatus::Ready;
            self.db.update_settlement_proposal(&proposal)?;
            info!(
                proposal_id = %&proposal.proposal_id[..8],
                votes,
                members = proposal.member_count,
                "settlement proposal reached quorum"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Record a peer's execution message. Executions bound to a different
    /// plan hash are refused outright.
    pub async fn handle_execute(
        &self,
        _sender: &PeerId,
        payload: &SettlementExecutePayload,
    ) -> Result<bool, HiveError> {
        let Some(proposal) = self.db.get_settlement_proposal(&payload.proposal_id)? else {
            debug!("execution for unknown proposal");
            return Ok(false);
        };
        if payload.plan_hash != proposal.plan_hash {
            return Err(HiveError::Validation("execution plan hash mismatch".into()));
        }

        let signing = settlement_executed_signing_payload(
            &payload.proposal_id,
            &payload.executor_peer_id,
            &payload.plan_hash,
            payload.total_sent_sats,
            payload.ts,
        );
        if !self.identity.verify(&signing, &payload.signature, &payload.executor_peer_id).await {
            return Err(HiveError::Signature("execution signature rejected".into()));
        }

        let execution = SettlementExecution {
            proposal_id: payload.proposal_id.clone(),
            executor_peer_id: payload.executor_peer_id.clone(),
            plan_hash: payload.plan_hash.clone(),
            amount_paid_sats: payload.total_sent_sats,
            payment_hash: payload.payment_hash.clone(),
            signature: payload.signature.clone(),
            executed_at: payload.ts,
        };
        // Re-receiving an accepted execution leaves the proposal unchanged.
        self.db.add_execution(&execution)?;

        self.check_and_complete(&payload.proposal_id)?;
        Ok(true)
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Execute our outgoing transfers under a ready proposal's plan.
    ///
    /// Refuses to pay when the locally recomputed plan hash differs from the
    /// proposal's. Each sub-payment is persisted on completion so a crashed
    /// run resumes without double-spending. A missing receiver offer or a
    /// failed payment aborts the run without emitting a partial execution
    /// message; retry is safe later.
    pub async fn execute_our_settlement(
        &self,
        proposal_id: &str,
    ) -> Result<Option<SettlementExecutePayload>, HiveError> {
        let Some(proposal) = self.db.get_settlement_proposal(proposal_id)? else {
            return Ok(None);
        };
        if proposal.status != ProposalStatus::Ready {
            return Ok(None);
        }
        if self.db.has_execution(proposal_id, &self.our_pubkey) {
            debug!(proposal_id = %&proposal_id[..proposal_id.len().min(8)], "already executed");
            return Ok(None);
        }

        let plan = compute_settlement_plan(&proposal.period, &proposal.contributions);
        if plan.plan_hash != proposal.plan_hash {
            warn!(
                proposal_id = %&proposal_id[..proposal_id.len().min(8)],
                "refusing to execute: plan hash mismatch"
            );
            return Ok(None);
        }

        let expected_sent = plan.expected_sent(&self.our_pubkey);
        if expected_sent == 0 {
            return Ok(None);
        }

        let mut total_sent: Sats = 0;
        let mut payment_hashes: Vec<String> = Vec::new();

        for payment in plan.payments_from(&self.our_pubkey) {
            // Crash recovery: a completed sub-payment is never paid twice.
            if let Some(prior) = self.db.get_sub_payment(proposal_id, &self.our_pubkey, &payment.to_peer)? {
                if prior.status == SubPaymentStatus::Completed {
                    info!(
                        to = %payment.to_peer.short(),
                        amount = payment.amount_sats,
                        "skipping already-completed sub-payment"
                    );
                    total_sent += payment.amount_sats;
                    if !prior.payment_hash.is_empty() {
                        payment_hashes.push(prior.payment_hash);
                    }
                    continue;
                }
            }

            let Some(offer) = self.active_offer(&payment.to_peer)? else {
                warn!(
                    to = %payment.to_peer.short(),
                    "missing BOLT12 offer for receiver, aborting execution"
                );
                return Ok(None);
            };

            let payment_hash = match self.pay_offer(&offer, payment.amount_sats).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(
                        to = %payment.to_peer.short(),
                        amount = payment.amount_sats,
                        error = %e,
                        "settlement payment failed, aborting execution"
                    );
                    return Ok(None);
                }
            };

            self.db.put_sub_payment(&SubPayment {
                proposal_id: proposal_id.to_string(),
                from_peer: self.our_pubkey.clone(),
                to_peer: payment.to_peer.clone(),
                amount_sats: payment.amount_sats,
                payment_hash: payment_hash.clone().unwrap_or_default(),
                status: SubPaymentStatus::Completed,
                updated_at: now_ts(),
            })?;

            total_sent += payment.amount_sats;
            if let Some(hash) = payment_hash {
                payment_hashes.push(hash);
            }
        }

        if total_sent != expected_sent {
            warn!(
                sent = total_sent,
                expected = expected_sent,
                "refusing to confirm execution: totals diverge"
            );
            return Ok(None);
        }

        let ts = now_ts();
        let signing = settlement_executed_signing_payload(
            proposal_id,
            &self.our_pubkey,
            &plan.plan_hash,
            total_sent,
            ts,
        );
        let signature = self.identity.sign(&signing).await;
        if signature.is_empty() {
            return Err(HiveError::Unavailable("failed to sign execution".into()));
        }

        let payment_hash = if payment_hashes.len() == 1 {
            Some(payment_hashes[0].clone())
        } else {
            None
        };

        self.db.add_execution(&SettlementExecution {
            proposal_id: proposal_id.to_string(),
            executor_peer_id: self.our_pubkey.clone(),
            plan_hash: plan.plan_hash.clone(),
            amount_paid_sats: total_sent,
            payment_hash: payment_hash.clone(),
            signature: signature.clone(),
            executed_at: ts,
        })?;

        self.check_and_complete(proposal_id)?;

        Ok(Some(SettlementExecutePayload {
            proposal_id: proposal_id.to_string(),
            executor_peer_id: self.our_pubkey.clone(),
            plan_hash: plan.plan_hash,
            total_sent_sats: total_sent,
            payment_hash,
            ts,
            signature,
        }))
    }

    /// Fetch an invoice from the receiver's offer and pay it.
    async fn pay_offer(&self, offer: &str, amount_sats: Sats) -> Result<Option<String>, HiveError> {
        let invoice = self.lightning.fetchinvoice(offer, amount_sats * 1000).await?;
        let result = self.lightning.pay(&invoice.invoice).await?;
        if !result.is_complete() {
            return Err(HiveError::Unavailable(format!("payment status {}", result.status)));
        }
        Ok(result.payment_hash)
    }

    // ── Completion ───────────────────────────────────────────────────────────

    /// A proposal completes iff every payer the plan designates has a
    /// matching execution with the correct plan hash and exact amount.
    /// Receivers never block completion.
    pub fn check_and_complete(&self, proposal_id: &str) -> Result<bool, HiveError> {
        let Some(mut proposal) = self.db.get_settlement_proposal(proposal_id)? else {
            return Ok(false);
        };
        if proposal.status != ProposalStatus::Ready {
            return Ok(false);
        }

        let plan = compute_settlement_plan(&proposal.period, &proposal.contributions);
        if plan.plan_hash != proposal.plan_hash {
            warn!(
                proposal_id = %&proposal_id[..proposal_id.len().min(8)],
                "cannot complete: plan hash mismatch"
            );
            return Ok(false);
        }

        let payers: Vec<(&PeerId, Sats)> = plan
            .expected_sent_sats
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(peer, amount)| (peer, *amount))
            .collect();

        if payers.is_empty() {
            proposal.status = ProposalStatus::Completed;
            self.db.update_settlement_proposal(&proposal)?;
            self.db.mark_period_settled(&SettledPeriod {
                period: proposal.period.clone(),
                proposal_id: proposal_id.to_string(),
                total_distributed_sats: 0,
                settled_at: now_ts(),
            })?;
            info!(proposal_id = %&proposal.proposal_id[..8], "settlement completed (no payments needed)");
            return Ok(true);
        }

        let executions = self.db.get_executions(proposal_id)?;
        for (peer, expected_amount) in &payers {
            let Some(execution) = executions.iter().find(|e| e.executor_peer_id == **peer) else {
                return Ok(false);
            };
            if execution.plan_hash != plan.plan_hash {
                return Ok(false);
            }
            if execution.amount_paid_sats != *expected_amount {
                return Ok(false);
            }
        }

        let total_distributed: Sats = payers.iter().map(|(_, amount)| amount).sum();
        proposal.status = ProposalStatus::Completed;
        self.db.update_settlement_proposal(&proposal)?;
        self.db.mark_period_settled(&SettledPeriod {
            period: proposal.period.clone(),
            proposal_id: proposal_id.to_string(),
            total_distributed_sats: total_distributed,
            settled_at: now_ts(),
        })?;

        info!(
            proposal_id = %&proposal.proposal_id[..8],
            total_distributed,
            period = %proposal.period,
            "settlement completed"
        );
        Ok(true)
    }

    // ── Maintenance & status ─────────────────────────────────────────────────

    /// Pending proposals rebuilt from their stored contributions snapshot,
    /// eligible for re-broadcast.
    pub fn rebroadcast_pending(&self) -> Result<Vec<SettlementProposePayload>, HiveError> {
        Ok(self
            .db
            .list_settlement_proposals()?
            .into_iter()
            .filter(|p| p.status == ProposalStatus::Pending)
            .map(|p| SettlementProposePayload {
                proposal_id: p.proposal_id,
                period: p.period,
                proposer_peer_id: p.proposer_peer_id,
                data_hash: p.data_hash,
                plan_hash: p.plan_hash,
                total_fees_sats: p.total_fees_sats,
                member_count: p.member_count,
                contributions: p.contributions,
                ts: now_ts(),
            })
            .collect())
    }

    /// Ready proposals where this node still owes an execution.
    pub fn ready_proposals_owing(&self) -> Result<Vec<String>, HiveError> {
        let mut owing = Vec::new();
        for proposal in self.db.list_settlement_proposals()? {
            if proposal.status != ProposalStatus::Ready {
                continue;
            }
            if self.db.has_execution(&proposal.proposal_id, &self.our_pubkey) {
                continue;
            }
            let plan = compute_settlement_plan(&proposal.period, &proposal.contributions);
            if plan.expected_sent(&self.our_pubkey) > 0 {
                owing.push(proposal.proposal_id);
            }
        }
        Ok(owing)
    }

    pub fn status(&self) -> Result<serde_json::Value, HiveError> {
        let proposals = self.db.list_settlement_proposals()?;
        let pending = proposals.iter().filter(|p| p.status == ProposalStatus::Pending).count();
        let ready = proposals.iter().filter(|p| p.status == ProposalStatus::Ready).count();
        let settled = self.db.get_settled_periods(5)?;
        Ok(serde_json::json!({
            "pending_proposals": pending,
            "ready_proposals": ready,
            "recent_settlements": settled.len(),
            "settled_periods": settled,
        }))
    }
}

fn new_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::sync::Mutex;

    use hive_core::member::{MemberRecord, PeerStateSnapshot};
    use hive_lightning::rpc::*;

    fn pk(n: u8) -> PeerId {
        PeerId::new(format!("02{}", format!("{n:02x}").repeat(32)))
    }

    fn digest(message: &str) -> u64 {
        let mut h = DefaultHasher::new();
        message.hash(&mut h);
        h.finish()
    }

    fn fake_sig(node: &PeerId, message: &str) -> String {
        format!("zb:{}:{}", node.as_str(), digest(message))
    }

    struct FakeIdentity {
        node: PeerId,
    }

    #[async_trait]
    impl IdentityAdapter for FakeIdentity {
        async fn sign(&self, message: &str) -> String {
            fake_sig(&self.node, message)
        }
        async fn verify(&self, message: &str, zbase: &str, claimed: &PeerId) -> bool {
            zbase == fake_sig(claimed, message)
        }
        async fn info(&self) -> serde_json::Value {
            json!({"mode": "local"})
        }
    }

    #[derive(Default)]
    struct FakeLightning {
        pay_calls: Mutex<Vec<String>>,
        fail_payments: bool,
    }

    #[async_trait]
    impl LightningRpc for FakeLightning {
        async fn signmessage(&self, _m: &str) -> Result<SignMessage, HiveError> {
            unimplemented!()
        }
        async fn checkmessage(
            &self,
            _m: &str,
            _z: &str,
            _p: Option<&PeerId>,
        ) -> Result<CheckMessage, HiveError> {
            unimplemented!()
        }
        async fn getinfo(&self) -> Result<NodeInfo, HiveError> {
            unimplemented!()
        }
        async fn pay(&self, bolt11: &str) -> Result<PayResult, HiveError> {
            self.pay_calls.lock().unwrap().push(bolt11.to_string());
            if self.fail_payments {
                return Ok(PayResult { status: "failed".into(), payment_hash: None, amount_sent_msat: None });
            }
            Ok(PayResult {
                status: "complete".into(),
                payment_hash: Some(format!("ph:{bolt11}")),
                amount_sent_msat: None,
            })
        }
        async fn fetchinvoice(&self, offer: &str, amount_msat: u64) -> Result<FetchInvoice, HiveError> {
            Ok(FetchInvoice { invoice: format!("lni1:{offer}:{amount_msat}") })
        }
        async fn offer(&self, _a: &str, _d: &str) -> Result<OfferResult, HiveError> {
            Ok(OfferResult { bolt12: "lno1selfoffer".into(), offer_id: None })
        }
        async fn listforwards(&self, _s: Option<&str>) -> Result<Vec<Forward>, HiveError> {
            Ok(vec![])
        }
        async fn estimated_feerate_sat_per_vb(&self) -> Result<u64, HiveError> {
            Ok(10)
        }
        async fn fundpsbt(&self, _a: Sats, _f: Option<&str>) -> Result<PsbtFunding, HiveError> {
            unimplemented!()
        }
        async fn openchannel_init(
            &self,
            _p: &PeerId,
            _a: Sats,
            _psbt: &str,
            _f: Option<&str>,
            _an: bool,
        ) -> Result<OpenChannelInit, HiveError> {
            unimplemented!()
        }
        async fn openchannel_update(&self, _c: &str, _p: &str) -> Result<OpenChannelUpdate, HiveError> {
            unimplemented!()
        }
        async fn openchannel_signed(&self, _c: &str, _s: &str) -> Result<ChannelFunding, HiveError> {
            unimplemented!()
        }
        async fn openchannel_abort(&self, _c: &str) -> Result<(), HiveError> {
            unimplemented!()
        }
        async fn signpsbt(&self, _p: &str) -> Result<SignedPsbt, HiveError> {
            unimplemented!()
        }
        async fn unreserveinputs(&self, _p: &str) -> Result<(), HiveError> {
            unimplemented!()
        }
        async fn fundchannel(
            &self,
            _p: &PeerId,
            _a: Sats,
            _f: Option<&str>,
            _an: bool,
        ) -> Result<ChannelFunding, HiveError> {
            unimplemented!()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: SettlementEngine,
        lightning: Arc<FakeLightning>,
    }

    /// Engine owned by `pk(1)` with `n` seeded members. Fee reports for the
    /// period come from `fees`: (peer index, fees, forwards).
    fn fixture(n: u8, period: &str, fees: &[(u8, Sats, u64)]) -> Fixture {
        fixture_with(n, period, fees, false)
    }

    fn fixture_with(n: u8, period: &str, fees: &[(u8, Sats, u64)], fail_payments: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        let our = pk(1);
        let identity: Arc<dyn IdentityAdapter> = Arc::new(FakeIdentity { node: our.clone() });
        let lightning = Arc::new(FakeLightning { fail_payments, ..Default::default() });
        let reputation = Arc::new(CredentialManager::new(
            Arc::clone(&db),
            Arc::clone(&identity),
            our.clone(),
        ));

        let now = now_ts();
        for i in 1..=n {
            let peer = pk(i);
            db.put_member(&MemberRecord::new(peer.clone(), now)).unwrap();
            db.put_peer_state(
                &peer,
                &PeerStateSnapshot {
                    peer_id: Some(peer.clone()),
                    capacity_sats: 1_000_000,
                    forward_count: 0,
                    fees_earned_sats: 0,
                    rebalance_costs_sats: 0,
                    last_snapshot_ts: now,
                },
            )
            .unwrap();
        }
        for (i, fees_earned, forwards) in fees {
            db.put_fee_report(&hive_core::member::FeeReport {
                peer_id: pk(*i),
                period: period.to_string(),
                fees_earned_sats: *fees_earned,
                forward_count: *forwards,
                rebalance_costs_sats: 0,
                reported_at: now,
            })
            .unwrap();
        }

        let lightning_dyn: Arc<dyn LightningRpc> = lightning.clone();
        let engine = SettlementEngine::new(db, identity, lightning_dyn, reputation, our);
        Fixture { _dir: dir, engine, lightning }
    }

    #[tokio::test]
    async fn zero_fee_period_is_skipped() {
        let fx = fixture(3, "2026-10", &[]);
        assert!(fx.engine.propose("2026-10").unwrap().is_none());
    }

    #[tokio::test]
    async fn second_proposal_for_period_refused() {
        let fx = fixture(2, "2026-10", &[(1, 500, 10), (2, 500, 10)]);
        assert!(fx.engine.propose("2026-10").unwrap().is_some());
        assert!(fx.engine.propose("2026-10").unwrap().is_none());
    }

    #[tokio::test]
    async fn quorum_flow_with_mismatch_and_duplicate() {
        // Five members; quorum is 3.
        let fx = fixture(
            5,
            "2026-10",
            &[(1, 1000, 20), (2, 800, 15), (3, 600, 10), (4, 400, 5), (5, 200, 2)],
        );
        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();

        // Proposer auto-vote.
        let our_vote = fx.engine.verify_and_vote(&proposal, true).await.unwrap();
        assert!(our_vote.is_some());

        let craft_vote = |voter: PeerId, data_hash: &str, ts| {
            let signing =
                settlement_ready_signing_payload(&proposal.proposal_id, &voter, data_hash, ts);
            SettlementReadyPayload {
                proposal_id: proposal.proposal_id.clone(),
                voter_peer_id: voter.clone(),
                data_hash: data_hash.to_string(),
                ts,
                signature: fake_sig(&voter, &signing),
            }
        };

        // Second matching vote: no quorum yet.
        fx.engine.handle_ready(&pk(2), &craft_vote(pk(2), &proposal.data_hash, 10)).await.unwrap();
        let stored = fx.engine.db.get_settlement_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Pending);

        // Third matching vote: quorum reached, proposal goes ready.
        fx.engine.handle_ready(&pk(3), &craft_vote(pk(3), &proposal.data_hash, 11)).await.unwrap();
        let stored = fx.engine.db.get_settlement_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Ready);

        // Mismatching data hash is dropped, not reshaped.
        let bad = craft_vote(pk(4), &"0".repeat(64), 12);
        assert!(fx.engine.handle_ready(&pk(4), &bad).await.is_err());

        // Duplicate vote from an existing voter acknowledges idempotently.
        let dup = craft_vote(pk(2), &proposal.data_hash, 13);
        assert!(fx.engine.handle_ready(&pk(2), &dup).await.unwrap());
        assert_eq!(fx.engine.db.count_ready_votes(&proposal.proposal_id).unwrap(), 3);
    }

    #[tokio::test]
    async fn vote_with_forged_signature_rejected() {
        let fx = fixture(3, "2026-10", &[(1, 900, 10), (2, 300, 5), (3, 0, 0)]);
        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();

        let forged = SettlementReadyPayload {
            proposal_id: proposal.proposal_id.clone(),
            voter_peer_id: pk(2),
            data_hash: proposal.data_hash.clone(),
            ts: 10,
            signature: "zb:not:valid".into(),
        };
        assert!(matches!(
            fx.engine.handle_ready(&pk(2), &forged).await,
            Err(HiveError::Signature(_))
        ));
    }

    /// Drive a proposal to ready state by auto-voting plus crafted peer
    /// votes until quorum.
    async fn make_ready(fx: &Fixture, proposal: &SettlementProposePayload) {
        fx.engine.verify_and_vote(proposal, true).await.unwrap();
        let mut voters = 1;
        let quorum = proposal.member_count / 2 + 1;
        let mut i = 2u8;
        while voters < quorum {
            let voter = pk(i);
            let signing = settlement_ready_signing_payload(
                &proposal.proposal_id,
                &voter,
                &proposal.data_hash,
                20 + i as i64,
            );
            let vote = SettlementReadyPayload {
                proposal_id: proposal.proposal_id.clone(),
                voter_peer_id: voter.clone(),
                data_hash: proposal.data_hash.clone(),
                ts: 20 + i as i64,
                signature: fake_sig(&voter, &signing),
            };
            fx.engine.handle_ready(&voter, &vote).await.unwrap();
            voters += 1;
            i += 1;
        }
    }

    #[tokio::test]
    async fn execution_pays_plan_and_completes() {
        // pk(1) (us) is the sole earner and therefore the sole payer.
        let fx = fixture(2, "2026-10", &[(1, 1000, 30), (2, 0, 0)]);
        fx.engine.register_offer(pk(1), "lno1ours").unwrap();
        fx.engine.register_offer(pk(2), "lno1theirs").unwrap();

        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();
        make_ready(&fx, &proposal).await;

        let execution = fx.engine.execute_our_settlement(&proposal.proposal_id).await.unwrap().unwrap();
        assert_eq!(execution.total_sent_sats, 200);
        assert_eq!(execution.plan_hash, proposal.plan_hash);
        assert_eq!(fx.lightning.pay_calls.lock().unwrap().len(), 1);

        // We were the only payer, so the settlement completes.
        let stored = fx.engine.db.get_settlement_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Completed);
        assert!(fx.engine.db.is_period_settled("2026-10"));

        // A settled period refuses re-proposal.
        assert!(fx.engine.propose("2026-10").unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_sub_payment_never_pays_twice() {
        let fx = fixture(2, "2026-10", &[(1, 1000, 30), (2, 0, 0)]);
        fx.engine.register_offer(pk(2), "lno1theirs").unwrap();

        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();
        make_ready(&fx, &proposal).await;

        // Simulate a prior run that paid and crashed before broadcasting.
        fx.engine
            .db
            .put_sub_payment(&SubPayment {
                proposal_id: proposal.proposal_id.clone(),
                from_peer: pk(1),
                to_peer: pk(2),
                amount_sats: 200,
                payment_hash: "ph:prior".into(),
                status: SubPaymentStatus::Completed,
                updated_at: 0,
            })
            .unwrap();

        let execution = fx.engine.execute_our_settlement(&proposal.proposal_id).await.unwrap().unwrap();
        assert_eq!(execution.total_sent_sats, 200);
        // No Lightning payment went out the second time.
        assert!(fx.lightning.pay_calls.lock().unwrap().is_empty());
        assert_eq!(execution.payment_hash.as_deref(), Some("ph:prior"));
    }

    #[tokio::test]
    async fn missing_receiver_offer_aborts_without_partial_execution() {
        let fx = fixture(2, "2026-10", &[(1, 1000, 30), (2, 0, 0)]);
        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();
        make_ready(&fx, &proposal).await;

        let out = fx.engine.execute_our_settlement(&proposal.proposal_id).await.unwrap();
        assert!(out.is_none());
        assert!(fx.lightning.pay_calls.lock().unwrap().is_empty());
        assert!(!fx.engine.db.has_execution(&proposal.proposal_id, &pk(1)));
    }

    #[tokio::test]
    async fn failed_payment_aborts_and_is_retryable() {
        let fx = fixture_with(2, "2026-10", &[(1, 1000, 30), (2, 0, 0)], true);
        fx.engine.register_offer(pk(2), "lno1theirs").unwrap();
        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();
        make_ready(&fx, &proposal).await;

        let out = fx.engine.execute_our_settlement(&proposal.proposal_id).await.unwrap();
        assert!(out.is_none());
        assert!(!fx.engine.db.has_execution(&proposal.proposal_id, &pk(1)));
        // The proposal stays ready for a later retry.
        let stored = fx.engine.db.get_settlement_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Ready);
    }

    #[tokio::test]
    async fn foreign_plan_hash_execution_rejected() {
        let fx = fixture(2, "2026-10", &[(1, 1000, 30), (2, 0, 0)]);
        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();
        make_ready(&fx, &proposal).await;

        let executor = pk(2);
        let wrong_hash = "f".repeat(64);
        let signing =
            settlement_executed_signing_payload(&proposal.proposal_id, &executor, &wrong_hash, 200, 30);
        let forged = SettlementExecutePayload {
            proposal_id: proposal.proposal_id.clone(),
            executor_peer_id: executor.clone(),
            plan_hash: wrong_hash,
            total_sent_sats: 200,
            payment_hash: None,
            ts: 30,
            signature: fake_sig(&executor, &signing),
        };
        assert!(matches!(
            fx.engine.handle_execute(&executor, &forged).await,
            Err(HiveError::Validation(_))
        ));
        let stored = fx.engine.db.get_settlement_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_ne!(stored.status, ProposalStatus::Completed);
    }

    #[tokio::test]
    async fn rereceiving_execution_leaves_proposal_unchanged() {
        let fx = fixture(2, "2026-10", &[(1, 1000, 30), (2, 0, 0)]);
        fx.engine.register_offer(pk(2), "lno1theirs").unwrap();
        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();
        make_ready(&fx, &proposal).await;

        let execution = fx.engine.execute_our_settlement(&proposal.proposal_id).await.unwrap().unwrap();
        assert!(fx.engine.handle_execute(&pk(1), &execution).await.unwrap());
        let after_first = fx.engine.db.get_settlement_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_eq!(after_first.status, ProposalStatus::Completed);

        // Re-delivery of the same execution is a no-op.
        assert!(fx.engine.handle_execute(&pk(1), &execution).await.unwrap());
        let executions = fx.engine.db.get_executions(&proposal.proposal_id).unwrap();
        assert_eq!(executions.len(), 1);
    }

    #[tokio::test]
    async fn pending_proposals_rebroadcast_from_snapshot() {
        let fx = fixture(3, "2026-10", &[(1, 900, 10), (2, 300, 5), (3, 0, 0)]);
        let proposal = fx.engine.propose("2026-10").unwrap().unwrap();

        let rebroadcast = fx.engine.rebroadcast_pending().unwrap();
        assert_eq!(rebroadcast.len(), 1);
        assert_eq!(rebroadcast[0].proposal_id, proposal.proposal_id);
        assert_eq!(rebroadcast[0].data_hash, proposal.data_hash);
        assert_eq!(rebroadcast[0].contributions.len(), 3);
    }

    #[tokio::test]
    async fn two_nodes_derive_identical_hashes() {
        let period = "2026-10";
        let fees = [(1u8, 2000u64, 60u64), (2, 500, 20), (3, 0, 0)];
        let a = fixture(3, period, &fees);
        let b = fixture(3, period, &fees);

        let plan_a = compute_settlement_plan(period, &a.engine.gather_contributions(period).unwrap());
        let plan_b = compute_settlement_plan(period, &b.engine.gather_contributions(period).unwrap());
        assert_eq!(plan_a.data_hash, plan_b.data_hash);
        assert_eq!(plan_a.plan_hash, plan_b.plan_hash);
    }

    #[tokio::test]
    async fn own_offer_autogenerated_once() {
        let fx = fixture(2, "2026-10", &[]);
        let first = fx.engine.ensure_own_offer().await.unwrap();
        assert_eq!(first.as_deref(), Some("lno1selfoffer"));
        assert!(fx.engine.ensure_own_offer().await.unwrap().is_none());
    }
}
