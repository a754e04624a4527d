//! hive-reputation — DID reputation credentials.
//!
//! Issuance and verification go through the node identity (HSM signatures
//! over canonical payloads); aggregation turns the stored credential set
//! into a cached 0-100 score with tier and confidence.

pub mod manager;
pub mod profiles;

pub use manager::CredentialManager;
pub use profiles::{profile_for, validate_metrics, CredentialProfile, VALID_DOMAINS};
