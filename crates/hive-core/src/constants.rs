//! Protocol-wide constants. Row caps are enforced before every insert; the
//! store never evicts to make room.

// ── Row caps ─────────────────────────────────────────────────────────────────

pub const MAX_CREDENTIALS_PER_SUBJECT: u64 = 100;
pub const MAX_TOTAL_CREDENTIALS: u64 = 50_000;
pub const MAX_MANAGEMENT_CREDENTIALS: u64 = 1_000;
pub const MAX_MANAGEMENT_RECEIPTS: u64 = 100_000;

// ── Relay ────────────────────────────────────────────────────────────────────

/// Initial TTL stamped on messages we originate.
pub const DEFAULT_RELAY_TTL: u8 = 2;
/// Hard cap applied to any inbound TTL, however large the sender claims.
pub const MAX_RELAY_TTL: u8 = 8;
/// Seen-message cache entries older than this are dropped by the GC sweep.
pub const DEDUP_TTL_SECS: i64 = 3600;

// ── Reputation aggregation ───────────────────────────────────────────────────

/// Exponential recency decay: half-life ≈ 69 days.
pub const RECENCY_DECAY_LAMBDA: f64 = 0.01;
pub const AGGREGATION_CACHE_TTL_SECS: i64 = 3600;

pub const TIER_NEWCOMER_MAX: u8 = 59;
pub const TIER_RECOGNIZED_MAX: u8 = 74;
pub const TIER_TRUSTED_MAX: u8 = 84;
// 85+ = senior

pub const MAX_METRICS_JSON_LEN: usize = 4096;
pub const MAX_EVIDENCE_JSON_LEN: usize = 8192;
pub const MAX_REVOCATION_REASON_LEN: usize = 500;

// ── Management credentials ───────────────────────────────────────────────────

pub const MAX_ALLOWED_SCHEMAS_LEN: usize = 4096;
pub const MAX_CONSTRAINTS_LEN: usize = 4096;
pub const MAX_CREDENTIAL_VALID_DAYS: i64 = 730;
pub const MGMT_PRESENTS_PER_PEER_PER_HOUR: usize = 20;
pub const MGMT_REVOKES_PER_PEER_PER_HOUR: usize = 10;

/// Base pricing per danger point (sats), used by escrow-facing surfaces.
pub const BASE_PRICE_PER_DANGER_POINT: u64 = 100;

// ── Settlement ───────────────────────────────────────────────────────────────

/// Absolute minimum payment to avoid dust transfers.
pub const MIN_PAYMENT_FLOOR_SATS: u64 = 100;

/// Deterministic payment-plan version. Bump when the plan algorithm changes
/// in a way that affects plan hashes.
pub const SETTLEMENT_PLAN_VERSION: u32 = 2;

// Fair share weights (standard mode).
pub const WEIGHT_CAPACITY: f64 = 0.30;
pub const WEIGHT_FORWARDS: f64 = 0.60;
pub const WEIGHT_UPTIME: f64 = 0.10;

// Fair share weights (network-optimized mode).
pub const WEIGHT_CAPACITY_NETWORK: f64 = 0.25;
pub const WEIGHT_FORWARDS_NETWORK: f64 = 0.55;
pub const WEIGHT_UPTIME_NETWORK: f64 = 0.10;
pub const WEIGHT_NETWORK_POSITION: f64 = 0.10;

/// Members with centrality below this floor get no network-position bonus.
pub const MIN_CENTRALITY_FOR_BONUS: f64 = 0.3;

// ── Liveness ─────────────────────────────────────────────────────────────────

/// A member silent past this threshold is marked inactive (never evicted).
pub const LIVENESS_INACTIVE_SECS: i64 = 3600;

// ── Circuit breaker ──────────────────────────────────────────────────────────

pub const BREAKER_MAX_FAILURES: u32 = 3;
pub const BREAKER_RESET_TIMEOUT_SECS: u64 = 60;
pub const BREAKER_HALF_OPEN_SUCCESSES: u32 = 2;

// ── Wire ─────────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u16 = 1;
