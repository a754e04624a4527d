//! hive-settlement — distributed weekly revenue settlement.
//!
//! Every node independently derives the same numbers from the same gossiped
//! fee reports: a fair-share allocation over net profit, a deterministic
//! payment plan, and two SHA-256 hashes binding the round. Quorum voting
//! gates execution; executors refuse to pay unless their locally computed
//! plan hash matches the proposal's.

pub mod engine;
pub mod fair_share;
pub mod period;
pub mod plan;

pub use engine::SettlementEngine;
pub use fair_share::{calculate_fair_shares, calculate_min_payment};
pub use period::{period_string, previous_period};
pub use plan::{compute_settlement_plan, SettlementPlan};
