use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{PeerId, Timestamp};

/// Per-peer sliding-window rate limiter.
///
/// Exceeding a limit is a validation-class drop, never a ban. The tracked-key
/// map self-prunes once it grows past 1000 entries so a churning peer set
/// cannot grow it without bound.
pub struct SlidingWindowLimiter {
    window_secs: i64,
    inner: Mutex<HashMap<(PeerId, &'static str), Vec<Timestamp>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window_secs: i64) -> Self {
        Self {
            window_secs,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Hourly window, the protocol default.
    pub fn hourly() -> Self {
        Self::new(3600)
    }

    /// Record one event for `(peer, kind)` and report whether it fits the
    /// window. Returns false (and does not record) when the peer is over
    /// `max_per_window`.
    pub fn allow(&self, peer: &PeerId, kind: &'static str, max_per_window: usize, now: Timestamp) -> bool {
        let cutoff = now - self.window_secs;
        let mut map = self.inner.lock().expect("rate limiter lock poisoned");

        let stamps = map.entry((peer.clone(), kind)).or_default();
        stamps.retain(|ts| *ts > cutoff);
        if stamps.len() >= max_per_window {
            return false;
        }
        stamps.push(now);

        if map.len() > 1000 {
            map.retain(|_, vals| vals.last().map_or(false, |ts| *ts > cutoff));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(n: u8) -> PeerId {
        PeerId::new(format!("02{}", format!("{n:02x}").repeat(32)))
    }

    #[test]
    fn enforces_per_window_max() {
        let rl = SlidingWindowLimiter::hourly();
        let peer = pk(1);
        for _ in 0..3 {
            assert!(rl.allow(&peer, "present", 3, 1000));
        }
        assert!(!rl.allow(&peer, "present", 3, 1000));
    }

    #[test]
    fn window_slides() {
        let rl = SlidingWindowLimiter::new(60);
        let peer = pk(1);
        assert!(rl.allow(&peer, "present", 1, 1000));
        assert!(!rl.allow(&peer, "present", 1, 1030));
        // Original event ages out of the window.
        assert!(rl.allow(&peer, "present", 1, 1061));
    }

    #[test]
    fn peers_are_independent() {
        let rl = SlidingWindowLimiter::hourly();
        assert!(rl.allow(&pk(1), "present", 1, 1000));
        assert!(rl.allow(&pk(2), "present", 1, 1000));
    }
}
