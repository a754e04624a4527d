use hive_core::constants::MAX_RELAY_TTL;
use hive_core::types::{now_ts, PeerId};
use hive_wire::{Envelope, RelayMeta};

/// TTL-bounded epidemic relay with path exclusion.
///
/// The relay is intentionally epidemic: convergence is the goal, not
/// minimality. Forwarding is suppressed once the decremented TTL reaches
/// zero, and never targets the sender, this node, or anyone already in the
/// path.
pub struct Relay {
    our_pubkey: PeerId,
    default_ttl: u8,
}

impl Relay {
    pub fn new(our_pubkey: PeerId, default_ttl: u8) -> Self {
        Self {
            our_pubkey,
            default_ttl: default_ttl.min(MAX_RELAY_TTL),
        }
    }

    /// Stamp relay metadata onto an envelope we originate.
    pub fn prepare_for_broadcast(&self, mut envelope: Envelope) -> Envelope {
        let msg_id = envelope.msg_id();
        envelope.relay = Some(RelayMeta {
            msg_id,
            ttl: self.default_ttl,
            path: vec![self.our_pubkey.clone()],
            origin: self.our_pubkey.clone(),
            origin_ts: now_ts(),
        });
        envelope
    }

    /// Decrement TTL and append ourselves to the path. None when the
    /// decremented TTL would be zero (forwarding suppressed) or the envelope
    /// carries no relay metadata.
    pub fn prepare_for_relay(&self, envelope: &Envelope) -> Option<Envelope> {
        let meta = envelope.relay.as_ref()?;
        let ttl = meta.ttl.min(MAX_RELAY_TTL);
        if ttl <= 1 {
            return None;
        }
        let mut forwarded = envelope.clone();
        let mut path = meta.path.clone();
        if !path.contains(&self.our_pubkey) {
            path.push(self.our_pubkey.clone());
        }
        forwarded.relay = Some(RelayMeta {
            msg_id: meta.msg_id.clone(),
            ttl: ttl - 1,
            path,
            origin: meta.origin.clone(),
            origin_ts: meta.origin_ts,
        });
        Some(forwarded)
    }

    /// Members eligible to receive the forwarded envelope: everyone except
    /// the sender, this node, and peers already in the relay path.
    pub fn recipients<'a>(
        &self,
        envelope: &Envelope,
        sender: &PeerId,
        members: &'a [PeerId],
    ) -> Vec<&'a PeerId> {
        let path = envelope
            .relay
            .as_ref()
            .map(|m| m.path.as_slice())
            .unwrap_or(&[]);
        members
            .iter()
            .filter(|peer| **peer != *sender && **peer != self.our_pubkey && !path.contains(peer))
            .collect()
    }
}
