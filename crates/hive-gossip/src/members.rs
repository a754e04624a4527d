use std::sync::Arc;

use tracing::{debug, info};

use hive_core::constants::LIVENESS_INACTIVE_SECS;
use hive_core::member::{FeeReport, MemberRecord, PeerStateSnapshot};
use hive_core::types::{PeerId, Timestamp};
use hive_core::HiveError;
use hive_state::StateDb;
use hive_wire::message::{FeeReportPayload, GossipPayload, HelloPayload, StateHashPayload};

use crate::state_hash::local_state_hash;

/// The peer table: membership, liveness, and per-peer state snapshots.
///
/// HELLO establishes a member; gossip refreshes the snapshot cache; the
/// liveness sweep marks silent members inactive without ever evicting them.
pub struct MemberTable {
    db: Arc<StateDb>,
    our_pubkey: PeerId,
}

impl MemberTable {
    pub fn new(db: Arc<StateDb>, our_pubkey: PeerId) -> Self {
        Self { db, our_pubkey }
    }

    /// A verified HELLO creates the member (or re-activates a known one) and
    /// seeds its snapshot.
    pub fn handle_hello(
        &self,
        sender: &PeerId,
        payload: &HelloPayload,
        now: Timestamp,
    ) -> Result<(), HiveError> {
        if !sender.is_wellformed() {
            return Err(HiveError::Validation(format!("malformed peer id {sender}")));
        }

        match self.db.get_member(sender)? {
            Some(mut member) => {
                member.last_seen = now;
                member.active = true;
                self.db.put_member(&member)?;
            }
            None => {
                self.db.put_member(&MemberRecord::new(sender.clone(), now))?;
                info!(peer = %sender.short(), "new hive member");
            }
        }

        self.db.put_peer_state(
            sender,
            &PeerStateSnapshot {
                peer_id: Some(sender.clone()),
                capacity_sats: payload.capacity_sats,
                forward_count: payload.forward_count,
                fees_earned_sats: 0,
                rebalance_costs_sats: 0,
                last_snapshot_ts: now,
            },
        )
    }

    /// Periodic state gossip refreshes the best-effort snapshot cache.
    pub fn handle_gossip(
        &self,
        sender: &PeerId,
        payload: &GossipPayload,
        now: Timestamp,
    ) -> Result<(), HiveError> {
        self.touch(sender, now)?;
        self.db.put_peer_state(
            sender,
            &PeerStateSnapshot {
                peer_id: Some(sender.clone()),
                capacity_sats: payload.capacity_sats,
                forward_count: payload.forward_count,
                fees_earned_sats: payload.fees_earned_sats,
                rebalance_costs_sats: payload.rebalance_costs_sats,
                last_snapshot_ts: now,
            },
        )
    }

    /// Compare a peer's gossiped fingerprint against our cached view.
    /// Returns true when they diverge and a fee report should be requested.
    pub fn handle_state_hash(
        &self,
        sender: &PeerId,
        payload: &StateHashPayload,
        now: Timestamp,
    ) -> Result<bool, HiveError> {
        self.touch(sender, now)?;
        let Some(snapshot) = self.db.get_peer_state(sender)? else {
            return Ok(true); // nothing cached, request the report
        };
        let ours = local_state_hash(&snapshot);
        if ours != payload.state_hash {
            debug!(peer = %sender.short(), "state hash divergence detected");
            return Ok(true);
        }
        Ok(false)
    }

    /// Persist a peer's fee report for a period. This stream is the
    /// authoritative settlement input.
    pub fn handle_fee_report(
        &self,
        sender: &PeerId,
        payload: &FeeReportPayload,
        now: Timestamp,
    ) -> Result<(), HiveError> {
        self.touch(sender, now)?;
        self.db.put_fee_report(&FeeReport {
            peer_id: sender.clone(),
            period: payload.period.clone(),
            fees_earned_sats: payload.fees_earned_sats,
            forward_count: payload.forward_count,
            rebalance_costs_sats: payload.rebalance_costs_sats,
            reported_at: now,
        })
    }

    /// Update `last_seen` for any authenticated inbound message.
    pub fn touch(&self, peer: &PeerId, now: Timestamp) -> Result<(), HiveError> {
        if let Some(mut member) = self.db.get_member(peer)? {
            member.last_seen = now;
            member.active = true;
            self.db.put_member(&member)?;
        }
        Ok(())
    }

    /// Mark members silent past the threshold inactive and decay their
    /// uptime. Members are never evicted here. Returns the count deactivated.
    pub fn liveness_sweep(&self, now: Timestamp) -> Result<usize, HiveError> {
        let mut deactivated = 0;
        for mut member in self.db.iter_members()? {
            if member.peer_id == self.our_pubkey {
                continue;
            }
            let silent = now - member.last_seen;
            if member.active && silent > LIVENESS_INACTIVE_SECS {
                member.active = false;
                member.uptime_pct = (member.uptime_pct * 0.95).max(0.0);
                self.db.put_member(&member)?;
                deactivated += 1;
                debug!(peer = %member.peer_id.short(), "member marked inactive");
            } else if member.active {
                // Presence sampling nudges uptime back toward 1.
                member.uptime_pct = (member.uptime_pct * 0.95 + 0.05).min(1.0);
                self.db.put_member(&member)?;
            }
        }
        Ok(deactivated)
    }

    pub fn is_member(&self, peer: &PeerId) -> bool {
        self.db.member_exists(peer)
    }

    /// Active member pubkeys, for relay fan-out.
    pub fn member_ids(&self) -> Result<Vec<PeerId>, HiveError> {
        Ok(self
            .db
            .iter_members()?
            .into_iter()
            .filter(|m| m.active)
            .map(|m| m.peer_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(n: u8) -> PeerId {
        PeerId::new(format!("02{}", format!("{n:02x}").repeat(32)))
    }

    fn table() -> (tempfile::TempDir, MemberTable) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        (dir, MemberTable::new(db, pk(0)))
    }

    fn hello() -> HelloPayload {
        HelloPayload { capacity_sats: 1_000_000, forward_count: 3, ts: 100 }
    }

    #[test]
    fn hello_creates_member_once() {
        let (_dir, table) = table();
        table.handle_hello(&pk(1), &hello(), 100).unwrap();
        table.handle_hello(&pk(1), &hello(), 200).unwrap();
        assert!(table.is_member(&pk(1)));
        let member = table.db.get_member(&pk(1)).unwrap().unwrap();
        assert_eq!(member.joined_at, 100);
        assert_eq!(member.last_seen, 200);
    }

    #[test]
    fn malformed_sender_rejected() {
        let (_dir, table) = table();
        let bogus = PeerId::new("nothex");
        assert!(table.handle_hello(&bogus, &hello(), 100).is_err());
    }

    #[test]
    fn silent_member_goes_inactive_but_stays() {
        let (_dir, table) = table();
        table.handle_hello(&pk(1), &hello(), 100).unwrap();

        let deactivated = table.liveness_sweep(100 + LIVENESS_INACTIVE_SECS + 1).unwrap();
        assert_eq!(deactivated, 1);
        let member = table.db.get_member(&pk(1)).unwrap().unwrap();
        assert!(!member.active);
        assert!(table.is_member(&pk(1)), "inactive members are not evicted");

        // A new message re-activates.
        table.touch(&pk(1), 100 + LIVENESS_INACTIVE_SECS + 50).unwrap();
        assert!(table.db.get_member(&pk(1)).unwrap().unwrap().active);
    }

    #[test]
    fn state_hash_divergence_requests_report() {
        let (_dir, table) = table();
        table.handle_hello(&pk(1), &hello(), 100).unwrap();
        table
            .handle_gossip(
                &pk(1),
                &GossipPayload {
                    capacity_sats: 1_000_000,
                    forward_count: 3,
                    fees_earned_sats: 500,
                    rebalance_costs_sats: 0,
                    ts: 150,
                },
                150,
            )
            .unwrap();

        let matching = local_state_hash(&table.db.get_peer_state(&pk(1)).unwrap().unwrap());
        let same = table
            .handle_state_hash(&pk(1), &StateHashPayload { state_hash: matching, ts: 160 }, 160)
            .unwrap();
        assert!(!same);

        let diverged = table
            .handle_state_hash(
                &pk(1),
                &StateHashPayload { state_hash: "deadbeef".into(), ts: 170 },
                170,
            )
            .unwrap();
        assert!(diverged);
    }

    #[test]
    fn fee_reports_persist_per_period() {
        let (_dir, table) = table();
        table.handle_hello(&pk(1), &hello(), 100).unwrap();
        table
            .handle_fee_report(
                &pk(1),
                &FeeReportPayload {
                    period: "2026-10".into(),
                    fees_earned_sats: 750,
                    forward_count: 12,
                    rebalance_costs_sats: 25,
                    ts: 150,
                },
                150,
            )
            .unwrap();

        let report = table.db.get_fee_report("2026-10", &pk(1)).unwrap().unwrap();
        assert_eq!(report.fees_earned_sats, 750);
        assert_eq!(report.rebalance_costs_sats, 25);
    }
}
