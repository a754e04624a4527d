use serde::{Deserialize, Serialize};

use crate::types::{PeerId, Timestamp};

/// What scarce action an intent lock covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    ChannelOpen,
    Rebalance,
    SwapOut,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::ChannelOpen => "channel_open",
            IntentKind::Rebalance => "rebalance",
            IntentKind::SwapOut => "swap_out",
        }
    }
}

/// Soft coordination lock over `(kind, target)`. Concurrent claimants are
/// resolved deterministically: the numerically lowest owner pubkey wins,
/// losers back off until `deadline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentLock {
    pub intent_id: String,
    pub kind: IntentKind,
    /// Target pubkey or channel the action is aimed at.
    pub target: String,
    pub owner_peer_id: PeerId,
    pub deadline: Timestamp,
}

impl IntentLock {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.deadline
    }
}
