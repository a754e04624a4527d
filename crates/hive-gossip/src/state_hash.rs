use sha2::{Digest, Sha256};

use hive_core::member::PeerStateSnapshot;

/// Compact fingerprint over a node's fee/forward counters. Peers compare
/// fingerprints to detect divergence without shipping full state; a mismatch
/// triggers an on-demand fee-report request.
pub fn local_state_hash(snapshot: &PeerStateSnapshot) -> String {
    let canonical = format!(
        "{}:{}:{}:{}",
        snapshot.capacity_sats,
        snapshot.forward_count,
        snapshot.fees_earned_sats,
        snapshot.rebalance_costs_sats
    );
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(fees: u64) -> PeerStateSnapshot {
        PeerStateSnapshot {
            peer_id: None,
            capacity_sats: 1_000_000,
            forward_count: 42,
            fees_earned_sats: fees,
            rebalance_costs_sats: 10,
            last_snapshot_ts: 0,
        }
    }

    #[test]
    fn identical_counters_agree() {
        assert_eq!(local_state_hash(&snapshot(500)), local_state_hash(&snapshot(500)));
    }

    #[test]
    fn any_counter_change_diverges() {
        assert_ne!(local_state_hash(&snapshot(500)), local_state_hash(&snapshot(501)));
    }

    #[test]
    fn timestamp_is_not_part_of_the_fingerprint() {
        let mut a = snapshot(500);
        a.last_snapshot_ts = 1;
        let mut b = snapshot(500);
        b.last_snapshot_ts = 99;
        assert_eq!(local_state_hash(&a), local_state_hash(&b));
    }
}
