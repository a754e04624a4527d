use serde::{Deserialize, Serialize};
use std::fmt;

/// Satoshi amount. u64 covers the full 21M BTC supply in sats.
pub type Sats = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── PeerId ───────────────────────────────────────────────────────────────────

/// Lightning node public key: 33 bytes, carried as 66 lowercase hex chars.
///
/// `Ord` on the lowercase hex string equals numeric ordering of the key,
/// which is what the intent-lock tie-break and the settlement plan rely on.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(hex_pubkey: impl Into<String>) -> Self {
        Self(hex_pubkey.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(16);
        &self.0[..end]
    }

    /// Structural sanity check: 66 hex chars starting with 02/03.
    pub fn is_wellformed(&self) -> bool {
        self.0.len() == 66
            && (self.0.starts_with("02") || self.0.starts_with("03"))
            && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}…)", self.short())
    }
}

// ── MsgId ────────────────────────────────────────────────────────────────────

/// Content-addressed message identifier: BLAKE3 of the canonical payload
/// with relay metadata stripped, hex encoded.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(String);

impl MsgId {
    pub fn from_canonical(canonical_payload: &str) -> Self {
        Self(blake3::hash(canonical_payload.as_bytes()).to_hex().to_string())
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.len().min(16);
        write!(f, "MsgId({}…)", &self.0[..end])
    }
}

/// Current Unix time in seconds.
pub fn now_ts() -> Timestamp {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_ordering_is_numeric() {
        let a = PeerId::new(format!("02{}", "a".repeat(64)));
        let b = PeerId::new(format!("03{}", "0".repeat(64)));
        assert!(a < b, "02… sorts before 03…");
    }

    #[test]
    fn peer_id_normalizes_case() {
        let a = PeerId::new(format!("02{}", "AB".repeat(32)));
        let b = PeerId::new(format!("02{}", "ab".repeat(32)));
        assert_eq!(a, b);
    }

    #[test]
    fn msg_id_stable_for_same_payload() {
        let a = MsgId::from_canonical(r#"{"data":"test"}"#);
        let b = MsgId::from_canonical(r#"{"data":"test"}"#);
        assert_eq!(a, b);
    }
}
