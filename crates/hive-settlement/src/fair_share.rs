//! Fair-share allocation over the fleet's net profit.
//!
//! Each member gets a normalized contribution score (capacity, forwards,
//! uptime, and optionally network position), the scores are normalized to
//! sum to 1, and the integer sats are assigned by the largest-remainder
//! method so the allocation sums exactly to the fleet's net profit.

use std::collections::HashMap;

use hive_core::constants::{
    MIN_CENTRALITY_FOR_BONUS, MIN_PAYMENT_FLOOR_SATS, WEIGHT_CAPACITY, WEIGHT_CAPACITY_NETWORK,
    WEIGHT_FORWARDS, WEIGHT_FORWARDS_NETWORK, WEIGHT_NETWORK_POSITION, WEIGHT_UPTIME,
    WEIGHT_UPTIME_NETWORK,
};
use hive_core::settlement::{MemberContribution, SettlementResult};
use hive_core::types::{PeerId, Sats};

/// Dynamic minimum payment threshold: `max(100, total_fees / (members × 10))`.
///
/// Small fleets with small fees can still settle at the floor; larger fleets
/// don't spam dust payments; the threshold scales with fee volume.
pub fn calculate_min_payment(total_fees: Sats, member_count: usize) -> Sats {
    if member_count == 0 {
        return MIN_PAYMENT_FLOOR_SATS;
    }
    let dynamic_min = total_fees / (member_count as u64 * 10);
    MIN_PAYMENT_FLOOR_SATS.max(dynamic_min)
}

/// Compute each member's integer fair share of the fleet's net profit.
///
/// Standard weights: capacity 0.30, forwards 0.60, uptime 0.10.
/// Network-optimized adds a 0.10 network-position component from fleet
/// centrality (zero below the centrality floor).
///
/// `balance = fair_share − net_profit`: positive means the member is owed,
/// negative means the member owes. The returned list is sorted by peer_id
/// and its balances sum to exactly zero.
pub fn calculate_fair_shares(
    contributions: &[MemberContribution],
    network_optimized: bool,
) -> Vec<SettlementResult> {
    if contributions.is_empty() {
        return Vec::new();
    }

    // All iteration happens in peer_id order so every node walks the same
    // sequence of float operations.
    let mut members: Vec<&MemberContribution> = contributions.iter().collect();
    members.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

    let total_capacity: Sats = members.iter().map(|c| c.capacity).sum();
    let total_forwards: u64 = members.iter().map(|c| c.forward_count).sum();
    let total_net_profit: Sats = members.iter().map(|c| c.net_profit_sats()).sum();
    let total_uptime: f64 = members.iter().map(|c| c.uptime as f64).sum();
    let total_centrality: f64 = members.iter().map(|c| c.centrality).sum();

    if total_net_profit == 0 {
        return members
            .iter()
            .map(|c| SettlementResult {
                peer_id: c.peer_id.clone(),
                fees_earned: c.fees_earned,
                rebalance_costs: c.rebalance_costs,
                net_profit: c.net_profit_sats(),
                fair_share: 0,
                balance: 0,
                network_score: 0.0,
                network_bonus_sats: 0,
            })
            .collect();
    }

    let mut raw_scores: HashMap<PeerId, f64> = HashMap::new();
    let mut network_components: HashMap<PeerId, f64> = HashMap::new();

    for member in &members {
        let capacity_score = if total_capacity > 0 {
            member.capacity as f64 / total_capacity as f64
        } else {
            0.0
        };
        let forwards_score = if total_forwards > 0 {
            member.forward_count as f64 / total_forwards as f64
        } else {
            0.0
        };
        let uptime_score = if total_uptime > 0.0 {
            member.uptime as f64 / total_uptime
        } else {
            0.0
        };

        let (score, network_component) = if network_optimized {
            let mut network_score = if total_centrality > 0.0 {
                member.centrality / total_centrality
            } else {
                0.0
            };
            if member.centrality < MIN_CENTRALITY_FOR_BONUS {
                network_score = 0.0;
            }
            let base = WEIGHT_CAPACITY_NETWORK * capacity_score
                + WEIGHT_FORWARDS_NETWORK * forwards_score
                + WEIGHT_UPTIME_NETWORK * uptime_score;
            let network = WEIGHT_NETWORK_POSITION * network_score;
            (base + network, network)
        } else {
            let score = WEIGHT_CAPACITY * capacity_score
                + WEIGHT_FORWARDS * forwards_score
                + WEIGHT_UPTIME * uptime_score;
            (score, 0.0)
        };

        raw_scores.insert(member.peer_id.clone(), score);
        network_components.insert(member.peer_id.clone(), network_component);
    }

    let mut total_score: f64 = raw_scores.values().sum();
    if total_score <= 0.0 {
        // Degenerate fleet (all denominators zero): equal split.
        for member in &members {
            raw_scores.insert(member.peer_id.clone(), 1.0);
            network_components.insert(member.peer_id.clone(), 0.0);
        }
        total_score = members.len() as f64;
    }

    // Largest-remainder allocation: integer floors first, then one sat each
    // to the largest fractional remainders, ties broken by ascending peer_id.
    let ideals: Vec<(PeerId, f64)> = members
        .iter()
        .map(|m| {
            let weight = raw_scores[&m.peer_id] / total_score;
            (m.peer_id.clone(), total_net_profit as f64 * weight)
        })
        .collect();

    let mut floors: HashMap<PeerId, Sats> =
        ideals.iter().map(|(pid, v)| (pid.clone(), *v as Sats)).collect();
    let allocated: Sats = floors.values().sum();
    let remainder = total_net_profit - allocated;

    let mut frac_order: Vec<&(PeerId, f64)> = ideals.iter().collect();
    frac_order.sort_by(|(pid_a, v_a), (pid_b, v_b)| {
        let frac_a = v_a - v_a.floor();
        let frac_b = v_b - v_b.floor();
        frac_b
            .partial_cmp(&frac_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| pid_a.cmp(pid_b))
    });
    for (pid, _) in frac_order.into_iter().take(remainder as usize) {
        *floors.get_mut(pid).expect("floor entry exists") += 1;
    }

    let mut results = Vec::with_capacity(members.len());
    for member in &members {
        let fair_share = floors[&member.peer_id];
        let net_profit = member.net_profit_sats();
        let network_component = network_components[&member.peer_id];

        let (network_score, network_bonus_sats) = if network_optimized && total_score > 0.0 {
            let proportion = network_component / total_score;
            (
                (proportion * 1e6).round() / 1e6,
                (total_net_profit as f64 * proportion) as Sats,
            )
        } else {
            (0.0, 0)
        };

        results.push(SettlementResult {
            peer_id: member.peer_id.clone(),
            fees_earned: member.fees_earned,
            rebalance_costs: member.rebalance_costs,
            net_profit,
            fair_share,
            balance: fair_share as i64 - net_profit as i64,
            network_score,
            network_bonus_sats,
        });
    }

    debug_assert_eq!(
        results.iter().map(|r| r.balance).sum::<i64>(),
        0,
        "settlement balances must sum to zero"
    );

    results
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
    fn equal_members_split_equally() {
        // Two identical members: fair share 500 each, balances zero.
        let contribs = vec![contribution(1, 500, 10), contribution(2, 500, 10)];
        let results = calculate_fair_shares(&contribs, false);
        assert_eq!(results.len(), 2);
        for r in &results {
            assert_eq!(r.fair_share, 500);
            assert_eq!(r.balance, 0);
        }
        assert_eq!(calculate_min_payment(1000, 2), 100);
    }

    #[test]
    fn sole_earner_keeps_everything() {
        // A does all the work and earns all the fees; B contributes only
        // capacity and uptime but earned nothing, so nothing moves.
        let contribs = vec![contribution(1, 1000, 30), contribution(2, 0, 0)];
        let results = calculate_fair_shares(&contribs, false);

        let total: Sats = results.iter().map(|r| r.fair_share).sum();
        assert_eq!(total, 1000);
        let a = results.iter().find(|r| r.peer_id == pk(1)).unwrap();
        let b = results.iter().find(|r| r.peer_id == pk(2)).unwrap();
        // B still gets the capacity+uptime share of the profit.
        assert!(a.fair_share > b.fair_share);
        assert_eq!(a.balance + b.balance, 0);
    }

    #[test]
    fn shares_sum_exactly_to_net_profit() {
        let contribs = vec![
            contribution(1, 2000, 60),
            contribution(2, 500, 20),
            contribution(3, 0, 0),
            contribution(4, 333, 7),
        ];
        let results = calculate_fair_shares(&contribs, false);
        let total: Sats = results.iter().map(|r| r.fair_share).sum();
        assert_eq!(total, 2833);
        assert_eq!(results.iter().map(|r| r.balance).sum::<i64>(), 0);
    }

    #[test]
    fn rebalance_costs_reduce_contribution() {
        let mut heavy_rebalancer = contribution(1, 1000, 10);
        heavy_rebalancer.rebalance_costs = 1500; // net profit floors at 0
        let contribs = vec![heavy_rebalancer, contribution(2, 1000, 10)];
        let results = calculate_fair_shares(&contribs, false);
        let total_net: Sats = results.iter().map(|r| r.net_profit).sum();
        assert_eq!(total_net, 1000);
        let a = results.iter().find(|r| r.peer_id == pk(1)).unwrap();
        assert_eq!(a.net_profit, 0);
    }

    #[test]
    fn zero_profit_short_circuits() {
        let contribs = vec![contribution(1, 0, 10), contribution(2, 0, 20)];
        let results = calculate_fair_shares(&contribs, false);
        assert!(results.iter().all(|r| r.fair_share == 0 && r.balance == 0));
    }

    #[test]
    fn min_payment_scales_with_volume() {
        assert_eq!(calculate_min_payment(307, 2), 100);
        assert_eq!(calculate_min_payment(10_000, 5), 200);
        assert_eq!(calculate_min_payment(100_000, 10), 1000);
        assert_eq!(calculate_min_payment(500, 0), 100);
    }

    #[test]
    fn network_mode_rewards_central_members() {
        let mut hub = contribution(1, 500, 10);
        hub.centrality = 0.9;
        let mut leaf = contribution(2, 500, 10);
        leaf.centrality = 0.1; // below the bonus floor

        let results = calculate_fair_shares(&[hub, leaf], true);
        let hub_result = results.iter().find(|r| r.peer_id == pk(1)).unwrap();
        let leaf_result = results.iter().find(|r| r.peer_id == pk(2)).unwrap();
        assert!(hub_result.fair_share > leaf_result.fair_share);
        assert!(hub_result.network_bonus_sats > 0);
        assert_eq!(leaf_result.network_bonus_sats, 0);
    }

    #[test]
    fn result_order_is_deterministic() {
        let contribs = vec![contribution(3, 100, 1), contribution(1, 100, 1), contribution(2, 100, 1)];
        let results = calculate_fair_shares(&contribs, false);
        let order: Vec<_> = results.iter().map(|r| r.peer_id.clone()).collect();
        assert_eq!(order, vec![pk(1), pk(2), pk(3)]);
    }
}
