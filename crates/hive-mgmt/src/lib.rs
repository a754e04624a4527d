//! hive-mgmt — schema-gated management authorization.
//!
//! A static registry of danger-scored action schemas, tier-gated management
//! credentials, and signed execution receipts. Danger scores are
//! pre-computed and immutable per action; higher danger demands a higher
//! permission tier and, at total danger ≥ 5, full parameter presence.

pub mod danger;
pub mod manager;
pub mod registry;

pub use danger::DangerScore;
pub use manager::ManagementManager;
pub use registry::{
    check_authorization, get_action, get_schema, list_schemas, price_for, schema_matches,
    validate_command, ParamType, SchemaAction, SchemaCategory,
};
