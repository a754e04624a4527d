//! Deterministic payment plan and the two hashes that bind a settlement
//! round. `data_hash` commits to the canonical contributions snapshot;
//! `plan_hash` commits to the exact transfers derived from it.

use std::collections::HashMap;

use serde_json::json;
use sha2::{Digest, Sha256};

use hive_core::constants::SETTLEMENT_PLAN_VERSION;
use hive_core::settlement::{MemberContribution, PlannedPayment, SettlementResult};
use hive_core::types::{PeerId, Sats};
use hive_wire::canonical_json;

use crate::fair_share::{calculate_fair_shares, calculate_min_payment};

/// The full deterministic settlement plan for one period.
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub plan_version: u32,
    pub period: String,
    pub data_hash: String,
    pub plan_hash: String,
    pub min_payment_sats: Sats,
    pub payments: Vec<PlannedPayment>,
    pub expected_sent_sats: HashMap<PeerId, Sats>,
    pub total_fees_sats: Sats,
    /// Payer debt below the dust threshold that the plan drops.
    pub residual_sats: Sats,
    pub results: Vec<SettlementResult>,
}

impl SettlementPlan {
    pub fn expected_sent(&self, peer: &PeerId) -> Sats {
        self.expected_sent_sats.get(peer).copied().unwrap_or(0)
    }

    pub fn payments_from(&self, peer: &PeerId) -> Vec<&PlannedPayment> {
        self.payments.iter().filter(|p| p.from_peer == *peer).collect()
    }
}

/// Canonical data hash over the contributions snapshot:
/// `SHA256(period | peer:fees:costs:capacity:uptime | ...)` with the
/// contributions sorted by peer_id.
pub fn settlement_data_hash(period: &str, contributions: &[MemberContribution]) -> String {
    let mut sorted: Vec<&MemberContribution> = contributions.iter().collect();
    sorted.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

    let mut parts = vec![period.to_string()];
    for c in sorted {
        parts.push(format!(
            "{}:{}:{}:{}:{}",
            c.peer_id.as_str(),
            c.fees_earned,
            c.rebalance_costs,
            c.capacity,
            c.uptime
        ));
    }
    let canonical = parts.join("|");
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Plan hash: `SHA256(canonical_json({v, period, data_hash, min_payment_sats,
/// payments}))` with payments sorted by `(from, to, amount)`.
pub fn settlement_plan_hash(
    period: &str,
    data_hash: &str,
    min_payment_sats: Sats,
    payments: &[PlannedPayment],
) -> String {
    let mut sorted: Vec<&PlannedPayment> = payments.iter().collect();
    sorted.sort_by(|a, b| {
        a.from_peer
            .cmp(&b.from_peer)
            .then_with(|| a.to_peer.cmp(&b.to_peer))
            .then_with(|| a.amount_sats.cmp(&b.amount_sats))
    });

    let payload = json!({
        "v": SETTLEMENT_PLAN_VERSION,
        "period": period,
        "data_hash": data_hash,
        "min_payment_sats": min_payment_sats,
        "payments": sorted,
    });
    hex::encode(Sha256::digest(canonical_json(&payload).as_bytes()))
}

/// Greedy deterministic payer→receiver matching. Payers owe more than the
/// threshold, receivers are owed more than the threshold, both sides walk in
/// a fixed order, and every transfer is at least `min_payment`. A payer's
/// residual under the threshold is dropped as dust.
pub fn generate_payment_plan(
    results: &[SettlementResult],
    total_fees: Sats,
) -> (Vec<PlannedPayment>, Sats) {
    let member_count = results.len();
    let min_payment = calculate_min_payment(total_fees, member_count);

    let mut payers: Vec<&SettlementResult> = results
        .iter()
        .filter(|r| r.balance < -(min_payment as i64))
        .collect();
    let mut receivers: Vec<&SettlementResult> = results
        .iter()
        .filter(|r| r.balance > min_payment as i64)
        .collect();
    payers.sort_by(|a, b| a.balance.cmp(&b.balance).then_with(|| a.peer_id.cmp(&b.peer_id)));
    receivers.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.peer_id.cmp(&b.peer_id)));

    let mut receiver_remaining: HashMap<&PeerId, i64> =
        receivers.iter().map(|r| (&r.peer_id, r.balance)).collect();

    let mut payments = Vec::new();
    for payer in &payers {
        let mut owing = -payer.balance;
        for receiver in &receivers {
            if owing <= 0 {
                break;
            }
            let owed = receiver_remaining[&receiver.peer_id];
            if owed <= 0 {
                continue;
            }
            let amount = owing.min(owed);
            if (amount as Sats) < min_payment {
                continue;
            }
            payments.push(PlannedPayment {
                from_peer: payer.peer_id.clone(),
                to_peer: receiver.peer_id.clone(),
                amount_sats: amount as Sats,
            });
            owing -= amount;
            *receiver_remaining.get_mut(&receiver.peer_id).expect("receiver entry") -= amount;
        }
    }

    (payments, min_payment)
}

/// Compute the full deterministic plan from a canonical contributions
/// snapshot. Every node in the fleet derives identical output from identical
/// input; this function is the consistency contract.
pub fn compute_settlement_plan(period: &str, contributions: &[MemberContribution]) -> SettlementPlan {
    let data_hash = settlement_data_hash(period, contributions);
    let results = calculate_fair_shares(contributions, false);
    let total_fees: Sats = contributions.iter().map(|c| c.fees_earned).sum();
    let (payments, min_payment) = generate_payment_plan(&results, total_fees);

    let total_payer_debt: i64 = results
        .iter()
        .filter(|r| r.balance < -(min_payment as i64))
        .map(|r| -r.balance)
        .sum();
    let total_in_payments: Sats = payments.iter().map(|p| p.amount_sats).sum();
    let residual_sats = (total_payer_debt - total_in_payments as i64).max(0) as Sats;

    let plan_hash = settlement_plan_hash(period, &data_hash, min_payment, &payments);

    let mut expected_sent: HashMap<PeerId, Sats> = HashMap::new();
    for p in &payments {
        *expected_sent.entry(p.from_peer.clone()).or_insert(0) += p.amount_sats;
    }

    SettlementPlan {
        plan_version: SETTLEMENT_PLAN_VERSION,
        period: period.to_string(),
        data_hash,
        plan_hash,
        min_payment_sats: min_payment,
        payments,
        expected_sent_sats: expected_sent,
        total_fees_sats: total_fees,
        residual_sats,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(n: u8) -> PeerId {
        PeerId::new(format!("02{}", format!("{n:02x}").repeat(32)))
    }

    fn contribution(n: u8, fees: Sats, forwards: u64) -> MemberContribution {
        MemberContribution {
            peer_id: pk(n),
            fees_earned: fees,
            rebalance_costs: 0,
            capacity: 1_000_000,
            uptime: 100,
            forward_count: forwards,
            reputation_tier: "newcomer".into(),
            centrality: 0.0,
        }
    }

    #[test]
    fn equal_fleet_produces_empty_plan() {
        let contribs = vec![contribution(1, 500, 10), contribution(2, 500, 10)];
        let plan = compute_settlement_plan("2026-10", &contribs);
        assert_eq!(plan.min_payment_sats, 100);
        assert!(plan.payments.is_empty());
        assert_eq!(plan.residual_sats, 0);
    }

    #[test]
    fn asymmetric_two_member_fleet_pays_the_capacity_share() {
        // A earned everything and did all the routing, but B still carried
        // half the capacity and uptime: weights land at 0.8/0.2, so A owes B
        // exactly B's 200-sat share.
        let contribs = vec![contribution(1, 1000, 30), contribution(2, 0, 0)];
        let plan = compute_settlement_plan("2026-10", &contribs);
        assert_eq!(plan.total_fees_sats, 1000);
        assert_eq!(
            plan.payments,
            vec![PlannedPayment { from_peer: pk(1), to_peer: pk(2), amount_sats: 200 }]
        );
        assert_eq!(plan.expected_sent(&pk(1)), 200);
    }

    #[test]
    fn three_member_fleet_transfers_to_the_idle_member() {
        // A: heavy earner, B: moderate, C: idle. Net profit 2500,
        // min_payment = max(100, 2500/30) = 100.
        let contribs = vec![
            contribution(1, 2000, 60),
            contribution(2, 500, 20),
            contribution(3, 0, 0),
        ];
        let plan = compute_settlement_plan("2026-10", &contribs);
        assert_eq!(plan.min_payment_sats, 100);
        assert!(!plan.payments.is_empty());

        // A is the only payer; every transfer comes from A.
        for p in &plan.payments {
            assert_eq!(p.from_peer, pk(1));
        }
        // A's outgoing total equals its debt within the residual dust.
        let a = plan.results.iter().find(|r| r.peer_id == pk(1)).unwrap();
        let sent = plan.expected_sent(&pk(1));
        assert!(sent as i64 <= -a.balance);
        assert!((-a.balance - sent as i64) as Sats == plan.residual_sats);
        // C receives something.
        assert!(plan.payments.iter().any(|p| p.to_peer == pk(3)));
    }

    #[test]
    fn plan_is_deterministic_across_runs_and_input_order() {
        let forward = vec![contribution(1, 2000, 60), contribution(2, 500, 20), contribution(3, 0, 0)];
        let shuffled = vec![contribution(3, 0, 0), contribution(1, 2000, 60), contribution(2, 500, 20)];

        let a = compute_settlement_plan("2026-10", &forward);
        let b = compute_settlement_plan("2026-10", &shuffled);
        assert_eq!(a.data_hash, b.data_hash);
        assert_eq!(a.plan_hash, b.plan_hash);
        assert_eq!(a.payments, b.payments);
    }

    #[test]
    fn data_hash_tracks_every_canonical_field() {
        let base = vec![contribution(1, 500, 10), contribution(2, 500, 10)];
        let hash = settlement_data_hash("2026-10", &base);

        let mut changed = base.clone();
        changed[0].rebalance_costs = 50;
        assert_ne!(settlement_data_hash("2026-10", &changed), hash);

        let mut uptime_changed = base.clone();
        uptime_changed[1].uptime = 99;
        assert_ne!(settlement_data_hash("2026-10", &uptime_changed), hash);

        assert_ne!(settlement_data_hash("2026-11", &base), hash);
    }

    #[test]
    fn forward_count_does_not_enter_data_hash() {
        // The canonical string is peer:fees:costs:capacity:uptime.
        let base = vec![contribution(1, 500, 10), contribution(2, 500, 10)];
        let hash = settlement_data_hash("2026-10", &base);
        let mut changed = base.clone();
        changed[0].forward_count = 999;
        assert_eq!(settlement_data_hash("2026-10", &changed), hash);
    }

    #[test]
    fn plan_hash_is_64_hex_chars() {
        let plan = compute_settlement_plan("2026-10", &[contribution(1, 500, 10)]);
        assert_eq!(plan.plan_hash.len(), 64);
        assert_eq!(plan.data_hash.len(), 64);
        assert!(plan.plan_hash.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn transfers_never_fall_below_min_payment() {
        let contribs = vec![
            contribution(1, 5000, 100),
            contribution(2, 100, 5),
            contribution(3, 50, 2),
            contribution(4, 0, 0),
        ];
        let plan = compute_settlement_plan("2026-10", &contribs);
        for p in &plan.payments {
            assert!(p.amount_sats >= plan.min_payment_sats);
        }
    }
}
