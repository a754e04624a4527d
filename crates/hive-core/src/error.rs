use thiserror::Error;

#[derive(Debug, Error)]
pub enum HiveError {
    // ── Capacity: row cap exceeded; surfaced to caller, never retried ────────
    #[error("table {table} at capacity ({cap} rows)")]
    Capacity { table: &'static str, cap: u64 },

    // ── Validation: payload schema, profile or range violation ───────────────
    #[error("validation failed: {0}")]
    Validation(String),

    // ── Signature: missing, malformed, or pubkey-mismatched (fail-closed) ────
    #[error("signature rejected: {0}")]
    Signature(String),

    // ── Authorization: tier or schema pattern refused ────────────────────────
    #[error("not authorized: {0}")]
    Authorization(String),

    // ── Unavailable: circuit open, signer down, transport queue full ─────────
    #[error("unavailable: {0}")]
    Unavailable(String),

    // ── Transient: retryable storage error ───────────────────────────────────
    #[error("transient error: {0}")]
    Transient(String),

    // ── Fatal: invariant violation; abort the handler ────────────────────────
    #[error("invariant violated: {0}")]
    Fatal(String),

    // ── Serialization / storage carriers ─────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl HiveError {
    /// Whether a handler may retry the failed operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HiveError::Transient(_))
    }
}
