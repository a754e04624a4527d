use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info};

use hive_core::intent::{IntentKind, IntentLock};
use hive_core::types::{now_ts, PeerId, Timestamp};
use hive_wire::message::{IntentAckPayload, IntentPayload};

/// Soft-lock coordination for scarce actions (e.g. opening a channel to the
/// same target). Competing claimants resolve deterministically: the
/// numerically lowest pubkey wins, losers back off until the deadline.
pub struct IntentRegistry {
    our_pubkey: PeerId,
    locks: Mutex<HashMap<(IntentKind, String), IntentLock>>,
}

impl IntentRegistry {
    pub fn new(our_pubkey: PeerId) -> Self {
        Self { our_pubkey, locks: Mutex::new(HashMap::new()) }
    }

    /// Claim `(kind, target)` for ourselves. None when a lower-pubkey owner
    /// already holds a live claim and the caller must back off.
    pub fn claim(&self, kind: IntentKind, target: &str, deadline: Timestamp) -> Option<IntentPayload> {
        let now = now_ts();
        let mut locks = self.locks.lock().expect("intent lock poisoned");
        let key = (kind, target.to_string());

        if let Some(existing) = locks.get(&key) {
            if !existing.is_expired(now) && existing.owner_peer_id < self.our_pubkey {
                debug!(
                    target,
                    holder = %existing.owner_peer_id.short(),
                    "backing off: lower pubkey holds the intent"
                );
                return None;
            }
        }

        let intent_id = new_id();
        locks.insert(
            key,
            IntentLock {
                intent_id: intent_id.clone(),
                kind,
                target: target.to_string(),
                owner_peer_id: self.our_pubkey.clone(),
                deadline,
            },
        );
        Some(IntentPayload {
            request_id: intent_id,
            kind,
            target: target.to_string(),
            deadline,
            ts: now,
        })
    }

    /// Record a peer's intent and answer whether we concede. The lowest
    /// pubkey keeps the lock; everyone else yields until the deadline.
    pub fn handle_intent(&self, sender: &PeerId, payload: &IntentPayload) -> IntentAckPayload {
        let now = now_ts();
        let mut locks = self.locks.lock().expect("intent lock poisoned");
        let key = (payload.kind, payload.target.clone());
        let current = locks.get(&key).cloned();

        let foreign_lock = IntentLock {
            intent_id: payload.request_id.clone(),
            kind: payload.kind,
            target: payload.target.clone(),
            owner_peer_id: sender.clone(),
            deadline: payload.deadline,
        };

        let conceded = match current {
            Some(existing) if !existing.is_expired(now) => {
                if *sender < existing.owner_peer_id {
                    // The newcomer outranks the current holder.
                    if existing.owner_peer_id == self.our_pubkey {
                        info!(target = %payload.target, winner = %sender.short(), "conceding intent lock");
                    }
                    locks.insert(key, foreign_lock);
                    true
                } else {
                    existing.owner_peer_id != self.our_pubkey
                }
            }
            _ => {
                locks.insert(key, foreign_lock);
                true
            }
        };

        IntentAckPayload {
            request_id: payload.request_id.clone(),
            kind: payload.kind,
            target: payload.target.clone(),
            conceded,
        }
    }

    /// Whether we currently hold the live lock for `(kind, target)`.
    pub fn we_hold(&self, kind: IntentKind, target: &str) -> bool {
        let locks = self.locks.lock().expect("intent lock poisoned");
        locks
            .get(&(kind, target.to_string()))
            .map(|l| l.owner_peer_id == self.our_pubkey && !l.is_expired(now_ts()))
            .unwrap_or(false)
    }

    /// Drop expired locks. Returns the count removed.
    pub fn cleanup_expired(&self, now: Timestamp) -> usize {
        let mut locks = self.locks.lock().expect("intent lock poisoned");
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired(now));
        before - locks.len()
    }
}

fn new_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(n: u8) -> PeerId {
        PeerId::new(format!("02{}", format!("{n:02x}").repeat(32)))
    }

    fn intent(request_id: &str, target: &str, deadline: Timestamp) -> IntentPayload {
        IntentPayload {
            request_id: request_id.into(),
            kind: IntentKind::ChannelOpen,
            target: target.into(),
            deadline,
            ts: 0,
        }
    }

    #[test]
    fn lowest_pubkey_wins_the_race() {
        // We are pk(5); pk(2) announces the same target.
        let registry = IntentRegistry::new(pk(5));
        let deadline = now_ts() + 600;
        assert!(registry.claim(IntentKind::ChannelOpen, "02target", deadline).is_some());
        assert!(registry.we_hold(IntentKind::ChannelOpen, "02target"));

        let ack = registry.handle_intent(&pk(2), &intent("r1", "02target", deadline));
        assert!(ack.conceded, "lower pubkey takes the lock");
        assert!(!registry.we_hold(IntentKind::ChannelOpen, "02target"));

        // Re-claiming while the winner's lock is live backs off.
        assert!(registry.claim(IntentKind::ChannelOpen, "02target", deadline).is_none());
    }

    #[test]
    fn higher_pubkey_claimant_is_refused() {
        let registry = IntentRegistry::new(pk(2));
        let deadline = now_ts() + 600;
        registry.claim(IntentKind::ChannelOpen, "02target", deadline).unwrap();

        let ack = registry.handle_intent(&pk(7), &intent("r1", "02target", deadline));
        assert!(!ack.conceded, "we outrank the newcomer and keep the lock");
        assert!(registry.we_hold(IntentKind::ChannelOpen, "02target"));
    }

    #[test]
    fn expired_locks_free_the_target() {
        let registry = IntentRegistry::new(pk(5));
        let past = now_ts() - 10;
        let ack = registry.handle_intent(&pk(2), &intent("r1", "02target", past));
        assert!(ack.conceded);
        // The foreign lock is already expired, so we can claim.
        assert!(registry.claim(IntentKind::ChannelOpen, "02target", now_ts() + 600).is_some());
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let registry = IntentRegistry::new(pk(5));
        let now = now_ts();
        registry.handle_intent(&pk(2), &intent("r1", "a", now - 5));
        registry.handle_intent(&pk(3), &intent("r2", "b", now + 600));
        assert_eq!(registry.cleanup_expired(now), 1);
        assert_eq!(registry.cleanup_expired(now), 0);
    }

    #[test]
    fn different_targets_do_not_contend() {
        let registry = IntentRegistry::new(pk(5));
        let deadline = now_ts() + 600;
        registry.handle_intent(&pk(2), &intent("r1", "target_a", deadline));
        assert!(registry.claim(IntentKind::ChannelOpen, "target_b", deadline).is_some());
    }
}
