//! The management schema registry: 15 categories of node management
//! operations, each action carrying a pre-computed danger score, a required
//! permission tier, and a parameter schema. Immutable configuration loaded
//! at startup.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use hive_core::constants::BASE_PRICE_PER_DANGER_POINT;
use hive_core::credential::ReputationTier;
use hive_core::mgmt::{ManagementCredential, PermissionTier};
use hive_core::types::Timestamp;

use crate::danger::DangerScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Int,
    List,
    Dict,
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Str => "string",
            ParamType::Int => "integer",
            ParamType::List => "list",
            ParamType::Dict => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::Str => value.is_string(),
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::List => value.is_array(),
            ParamType::Dict => value.is_object(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaAction {
    pub danger: DangerScore,
    pub required_tier: PermissionTier,
    pub description: &'static str,
    pub parameters: &'static [(&'static str, ParamType)],
}

#[derive(Debug, Clone)]
pub struct SchemaCategory {
    pub schema_id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// `(min, max)` danger across the category's actions.
    pub danger_range: (u8, u8),
    pub actions: Vec<(&'static str, SchemaAction)>,
}

impl SchemaCategory {
    pub fn action(&self, name: &str) -> Option<&SchemaAction> {
        self.actions.iter().find(|(n, _)| *n == name).map(|(_, a)| a)
    }
}

macro_rules! action {
    ($name:literal, ($r:literal, $f:literal, $t:literal, $b:literal, $d:literal), $tier:ident, $desc:literal) => {
        ($name, SchemaAction {
            danger: DangerScore::new($r, $f, $t, $b, $d),
            required_tier: PermissionTier::$tier,
            description: $desc,
            parameters: &[],
        })
    };
    ($name:literal, ($r:literal, $f:literal, $t:literal, $b:literal, $d:literal), $tier:ident, $desc:literal, [$(($p:literal, $pt:ident)),+]) => {
        ($name, SchemaAction {
            danger: DangerScore::new($r, $f, $t, $b, $d),
            required_tier: PermissionTier::$tier,
            description: $desc,
            parameters: &[$(($p, ParamType::$pt)),+],
        })
    };
}

static REGISTRY: Lazy<BTreeMap<&'static str, SchemaCategory>> = Lazy::new(|| {
    let categories = [
        SchemaCategory {
            schema_id: "hive:monitor/v1",
            name: "Monitoring & Read-Only",
            description: "Read-only operations: node status, channel info, routing stats",
            danger_range: (1, 2),
            actions: vec![
                action!("get_info", (1, 1, 1, 1, 1), Monitor, "Get node info", [("format", Str)]),
                action!("list_channels", (1, 1, 1, 1, 1), Monitor, "List channels with balances"),
                action!("list_forwards", (1, 1, 1, 1, 1), Monitor, "List forwarding history", [("status", Str), ("limit", Int)]),
                action!("get_balance", (1, 1, 1, 1, 1), Monitor, "Get on-chain and channel balances"),
                action!("list_peers", (1, 1, 1, 1, 1), Monitor, "List connected peers"),
            ],
        },
        SchemaCategory {
            schema_id: "hive:fee-policy/v1",
            name: "Fee Management",
            description: "Set and adjust channel fee policies",
            danger_range: (2, 5),
            actions: vec![
                action!("set_single", (2, 2, 2, 1, 1), Standard, "Set fee on a single channel", [("channel_id", Str), ("base_msat", Int), ("fee_ppm", Int)]),
                action!("set_bulk", (3, 4, 3, 5, 2), Advanced, "Set fees on multiple channels at once", [("channels", List), ("policy", Dict)]),
                action!("set_anchor", (2, 2, 2, 1, 1), Standard, "Set anchor fee rate for a channel", [("channel_id", Str), ("target_fee_ppm", Int), ("reason", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:htlc-policy/v1",
            name: "HTLC Policy",
            description: "Configure HTLC size limits and CLTV deltas",
            danger_range: (2, 5),
            actions: vec![
                action!("set_htlc_limits", (3, 3, 2, 2, 2), Standard, "Set min/max HTLC size for a channel", [("channel_id", Str), ("htlc_minimum_msat", Int), ("htlc_maximum_msat", Int)]),
                action!("set_cltv_delta", (3, 2, 4, 2, 3), Standard, "Set CLTV expiry delta", [("channel_id", Str), ("cltv_expiry_delta", Int)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:forwarding/v1",
            name: "Forwarding Policy",
            description: "Control forwarding behavior and routing hints",
            danger_range: (2, 6),
            actions: vec![
                action!("disable_channel", (4, 3, 4, 2, 2), Standard, "Disable forwarding on a channel", [("channel_id", Str), ("reason", Str)]),
                action!("enable_channel", (2, 1, 1, 1, 1), Standard, "Re-enable forwarding on a channel", [("channel_id", Str)]),
                action!("set_routing_hints", (3, 2, 3, 3, 2), Advanced, "Set routing hints for invoice generation", [("hints", List)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:rebalance/v1",
            name: "Liquidity Management",
            description: "Rebalancing operations and liquidity movement",
            danger_range: (3, 6),
            actions: vec![
                action!("circular_rebalance", (4, 5, 3, 2, 3), Advanced, "Circular rebalance between channels", [("from_channel", Str), ("to_channel", Str), ("amount_sats", Int), ("max_fee_ppm", Int)]),
                action!("swap_out", (5, 6, 3, 2, 4), Advanced, "Swap Lightning to on-chain (loop out)", [("amount_sats", Int), ("address", Str)]),
                action!("swap_in", (4, 5, 3, 2, 3), Advanced, "Swap on-chain to Lightning (loop in)", [("amount_sats", Int)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:channel/v1",
            name: "Channel Lifecycle",
            description: "Open and close Lightning channels",
            danger_range: (5, 10),
            actions: vec![
                action!("open", (7, 8, 5, 3, 6), Advanced, "Open a new channel", [("peer_id", Str), ("amount_sats", Int), ("push_msat", Int)]),
                action!("close_cooperative", (6, 7, 4, 2, 5), Advanced, "Cooperatively close a channel", [("channel_id", Str), ("destination", Str)]),
                action!("close_force", (9, 9, 8, 3, 8), Admin, "Force close a channel (last resort)", [("channel_id", Str)]),
                action!("close_all", (10, 10, 9, 10, 9), Admin, "Close all channels (emergency only)", [("destination", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:splice/v1",
            name: "Splicing",
            description: "Splice in/out to resize channels without closing",
            danger_range: (5, 7),
            actions: vec![
                action!("splice_in", (5, 6, 4, 2, 4), Advanced, "Splice in (add funds to channel)", [("channel_id", Str), ("amount_sats", Int)]),
                action!("splice_out", (6, 7, 4, 2, 5), Advanced, "Splice out (remove funds from channel)", [("channel_id", Str), ("amount_sats", Int), ("destination", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:peer/v1",
            name: "Peer Management",
            description: "Connect/disconnect peers",
            danger_range: (2, 5),
            actions: vec![
                action!("connect", (2, 1, 1, 1, 1), Standard, "Connect to a peer", [("peer_id", Str), ("host", Str), ("port", Int)]),
                action!("disconnect", (3, 2, 3, 2, 2), Standard, "Disconnect from a peer", [("peer_id", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:payment/v1",
            name: "Payments & Invoicing",
            description: "Create invoices and send payments",
            danger_range: (1, 6),
            actions: vec![
                action!("create_invoice", (1, 1, 1, 1, 1), Monitor, "Create a Lightning invoice", [("amount_msat", Int), ("label", Str), ("description", Str)]),
                action!("pay", (5, 6, 3, 1, 4), Advanced, "Pay a Lightning invoice", [("bolt11", Str), ("max_fee_ppm", Int)]),
                action!("keysend", (5, 6, 3, 1, 4), Advanced, "Send a keysend payment", [("destination", Str), ("amount_msat", Int)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:wallet/v1",
            name: "Wallet & On-Chain",
            description: "On-chain wallet operations",
            danger_range: (1, 9),
            actions: vec![
                action!("list_funds", (1, 1, 1, 1, 1), Monitor, "List on-chain and channel funds"),
                action!("new_address", (1, 1, 1, 1, 1), Standard, "Generate a new on-chain address", [("type", Str)]),
                action!("withdraw", (8, 9, 5, 1, 8), Admin, "Withdraw on-chain funds to external address", [("destination", Str), ("amount_sats", Int), ("feerate", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:plugin/v1",
            name: "Plugin Management",
            description: "Start/stop/list plugins",
            danger_range: (1, 9),
            actions: vec![
                action!("list_plugins", (1, 1, 1, 1, 1), Monitor, "List installed plugins"),
                action!("start_plugin", (7, 5, 5, 7, 7), Admin, "Start a plugin", [("path", Str)]),
                action!("stop_plugin", (7, 5, 5, 7, 7), Admin, "Stop a plugin", [("plugin_name", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:config/v1",
            name: "Node Configuration",
            description: "Read and modify node configuration",
            danger_range: (1, 7),
            actions: vec![
                action!("get_config", (1, 1, 1, 1, 1), Monitor, "Get current configuration values", [("key", Str)]),
                action!("set_config", (5, 3, 5, 5, 5), Admin, "Set a configuration value", [("key", Str), ("value", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:backup/v1",
            name: "Backup Operations",
            description: "Create and manage backups",
            danger_range: (1, 10),
            actions: vec![
                action!("export_scb", (1, 1, 1, 1, 1), Standard, "Export static channel backup"),
                action!("verify_backup", (1, 1, 1, 1, 1), Monitor, "Verify backup integrity", [("backup_path", Str)]),
                action!("restore", (10, 10, 10, 10, 10), Admin, "Restore from backup (triggers force-close of all channels)", [("backup_path", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:emergency/v1",
            name: "Emergency Operations",
            description: "Emergency actions for node recovery",
            danger_range: (3, 10),
            actions: vec![
                action!("stop_node", (8, 6, 7, 3, 6), Admin, "Gracefully stop the Lightning node"),
                action!("emergency_close_all", (10, 10, 9, 10, 9), Admin, "Emergency close all channels and stop", [("destination", Str)]),
                action!("ban_peer", (4, 3, 3, 2, 3), Advanced, "Ban a malicious peer", [("peer_id", Str), ("reason", Str)]),
            ],
        },
        SchemaCategory {
            schema_id: "hive:htlc-mgmt/v1",
            name: "HTLC Management",
            description: "Manage in-flight HTLCs",
            danger_range: (1, 8),
            actions: vec![
                action!("list_htlcs", (1, 1, 1, 1, 1), Monitor, "List in-flight HTLCs"),
                action!("settle_htlc", (5, 6, 5, 2, 5), Advanced, "Manually settle an HTLC", [("htlc_id", Str), ("preimage", Str)]),
                action!("fail_htlc", (5, 6, 5, 2, 5), Advanced, "Manually fail an HTLC", [("htlc_id", Str), ("reason", Str)]),
            ],
        },
    ];

    categories.into_iter().map(|c| (c.schema_id, c)).collect()
});

pub fn list_schemas() -> Vec<&'static SchemaCategory> {
    REGISTRY.values().collect()
}

pub fn get_schema(schema_id: &str) -> Option<&'static SchemaCategory> {
    REGISTRY.get(schema_id)
}

pub fn get_action(schema_id: &str, action: &str) -> Option<&'static SchemaAction> {
    REGISTRY.get(schema_id)?.actions.iter().find(|(n, _)| *n == action).map(|(_, a)| a)
}

/// Pattern match for credential allowlists: exact id, `"*"` for everything,
/// or `"prefix/*"` which requires a literal `/` boundary so
/// `hive:fee-policy/*` never matches `hive:fee-policy-extra/...`.
pub fn schema_matches(pattern: &str, schema_id: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return schema_id.starts_with(&format!("{prefix}/"));
    }
    pattern == schema_id
}

/// Validate a command against its schema definition (dry run).
///
/// Supplied parameters are always type-checked. At total danger ≥ 5 every
/// declared parameter must also be present; below that, presence stays
/// optional.
pub fn validate_command(
    schema_id: &str,
    action: &str,
    params: Option<&Value>,
) -> Result<&'static SchemaAction, String> {
    let Some(category) = REGISTRY.get(schema_id) else {
        return Err(format!("unknown schema: {schema_id}"));
    };
    let Some(schema_action) = category.action(action) else {
        return Err(format!("unknown action '{action}' in schema {schema_id}"));
    };

    if let Some(Value::Object(supplied)) = params {
        for (name, expected) in schema_action.parameters {
            if let Some(value) = supplied.get(*name) {
                if !expected.matches(value) {
                    return Err(format!("parameter '{name}' must be {}", expected.name()));
                }
            }
        }
    }

    if schema_action.danger.total() >= 5 && !schema_action.parameters.is_empty() {
        let Some(Value::Object(supplied)) = params else {
            let names: Vec<_> = schema_action.parameters.iter().map(|(n, _)| *n).collect();
            return Err(format!(
                "high-danger action '{action}' requires parameters: {names:?}"
            ));
        };
        let missing: Vec<_> = schema_action
            .parameters
            .iter()
            .map(|(n, _)| *n)
            .filter(|n| !supplied.contains_key(*n))
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "high-danger action '{action}' missing required parameters: {missing:?}"
            ));
        }
    }

    Ok(schema_action)
}

/// Check whether a management credential authorizes `schema_id`/`action` at
/// `now`. The credential signature must be verified separately before this
/// is consulted.
pub fn check_authorization(
    credential: &ManagementCredential,
    schema_id: &str,
    action: &str,
    now: Timestamp,
) -> Result<(), String> {
    if credential.revoked_at.is_some() {
        return Err("credential revoked".into());
    }
    if credential.valid_until < now {
        return Err("credential expired".into());
    }
    if credential.valid_from > now {
        return Err("credential not yet valid".into());
    }

    let Some(required) = get_action(schema_id, action).map(|a| a.required_tier) else {
        return Err(format!("unknown action {schema_id}/{action}"));
    };
    if credential.tier.rank() < required.rank() {
        return Err(format!(
            "credential tier '{}' insufficient, requires '{}'",
            credential.tier.as_str(),
            required.as_str()
        ));
    }

    if !credential.allowed_schemas.iter().any(|p| schema_matches(p, schema_id)) {
        return Err(format!("schema {schema_id} not in credential allowlist"));
    }

    Ok(())
}

/// Advisory price in sats: danger total × base unit × reputation multiplier.
pub fn price_for(danger: &DangerScore, reputation_tier: ReputationTier) -> u64 {
    let multiplier = match reputation_tier {
        ReputationTier::Newcomer => 1.5,
        ReputationTier::Recognized => 1.0,
        ReputationTier::Trusted => 0.8,
        ReputationTier::Senior => 0.6,
    };
    let base = danger.total() as u64 * BASE_PRICE_PER_DANGER_POINT;
    ((base as f64 * multiplier) as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_has_fifteen_categories() {
        assert_eq!(list_schemas().len(), 15);
    }

    #[test]
    fn pattern_respects_category_boundary() {
        assert!(schema_matches("hive:fee-policy/*", "hive:fee-policy/v1"));
        assert!(!schema_matches("hive:fee-policy/*", "hive:fee-policy-extra/v1"));
        assert!(schema_matches("*", "hive:channel/v1"));
        assert!(schema_matches("hive:monitor/v1", "hive:monitor/v1"));
        assert!(!schema_matches("hive:monitor/v1", "hive:monitor/v2"));
    }

    #[test]
    fn low_danger_params_stay_optional() {
        // get_info declares `format` but danger 1 never requires it.
        assert!(validate_command("hive:monitor/v1", "get_info", None).is_ok());
        assert!(validate_command("hive:monitor/v1", "get_info", Some(&json!({}))).is_ok());
    }

    #[test]
    fn high_danger_requires_all_params() {
        let err = validate_command("hive:channel/v1", "open", Some(&json!({"peer_id": "02ab"}))).unwrap_err();
        assert!(err.contains("missing required parameters"));

        let ok = validate_command(
            "hive:channel/v1",
            "open",
            Some(&json!({"peer_id": "02ab", "amount_sats": 1_000_000, "push_msat": 0})),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn supplied_params_are_type_checked() {
        let err = validate_command(
            "hive:fee-policy/v1",
            "set_single",
            Some(&json!({"channel_id": 123})),
        )
        .unwrap_err();
        assert!(err.contains("channel_id"));
    }

    #[test]
    fn restore_is_maximally_dangerous() {
        let action = get_action("hive:backup/v1", "restore").unwrap();
        assert_eq!(action.danger.total(), 10);
        assert_eq!(action.required_tier, PermissionTier::Admin);
    }

    #[test]
    fn authorization_enforces_tier_and_allowlist() {
        use hive_core::types::PeerId;
        let pk = |n: u8| PeerId::new(format!("02{}", format!("{n:02x}").repeat(32)));
        let cred = ManagementCredential::new(
            "c1".into(),
            pk(1),
            pk(2),
            pk(1),
            PermissionTier::Standard,
            vec!["hive:fee-policy/*".into()],
            json!({}),
            0,
            1_000_000,
            "sig".into(),
        )
        .unwrap();

        assert!(check_authorization(&cred, "hive:fee-policy/v1", "set_single", 500).is_ok());
        // Tier too low for an advanced action.
        assert!(check_authorization(&cred, "hive:fee-policy/v1", "set_bulk", 500).is_err());
        // Schema outside the allowlist.
        assert!(check_authorization(&cred, "hive:monitor/v1", "get_info", 500).is_err());
        // Outside the validity window.
        assert!(check_authorization(&cred, "hive:fee-policy/v1", "set_single", 2_000_000).is_err());
    }

    #[test]
    fn pricing_discounts_by_reputation() {
        let danger = DangerScore::new(5, 5, 5, 5, 5);
        assert_eq!(price_for(&danger, ReputationTier::Newcomer), 750);
        assert_eq!(price_for(&danger, ReputationTier::Recognized), 500);
        assert_eq!(price_for(&danger, ReputationTier::Trusted), 400);
        assert_eq!(price_for(&danger, ReputationTier::Senior), 300);
    }
}
