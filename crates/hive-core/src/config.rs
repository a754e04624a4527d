use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::DEFAULT_RELAY_TTL;

/// How the node reacts when its operator is unreachable.
///
/// The legacy config value `"autonomous"` is accepted as an alias for
/// `Failsafe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceMode {
    Supervised,
    Failsafe,
}

impl<'de> Deserialize<'de> for GovernanceMode {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        match s.as_str() {
            "supervised" => Ok(GovernanceMode::Supervised),
            "failsafe" | "autonomous" => Ok(GovernanceMode::Failsafe),
            other => Err(D::Error::custom(format!("unknown governance_mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VpnMode {
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "vpn-preferred")]
    VpnPreferred,
    #[serde(rename = "vpn-only")]
    VpnOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    Local,
    Remote,
}

/// Node configuration, loaded from a JSON file and overridable per-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub governance_mode: GovernanceMode,
    pub vpn_mode: VpnMode,
    /// CIDR allowlist consulted when `vpn_mode` restricts transport.
    pub vpn_subnets: Vec<String>,
    /// Message kinds a peer must have sent before being counted live.
    pub required_messages: Vec<String>,
    pub settlement_enabled: bool,
    pub settlement_period_weeks: u32,
    pub relay_ttl_default: u8,
    pub feerate_gate_threshold_sat_per_vb: u64,
    pub identity_mode: IdentityMode,
    /// JSON-RPC endpoint of the sibling signer (remote identity mode only).
    pub remote_signer_url: Option<String>,
    /// JSON-RPC endpoint of the Lightning node.
    pub lightning_rpc_url: String,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            governance_mode: GovernanceMode::Supervised,
            vpn_mode: VpnMode::Any,
            vpn_subnets: Vec::new(),
            required_messages: Vec::new(),
            settlement_enabled: true,
            settlement_period_weeks: 1,
            relay_ttl_default: DEFAULT_RELAY_TTL,
            feerate_gate_threshold_sat_per_vb: 50,
            identity_mode: IdentityMode::Local,
            remote_signer_url: None,
            lightning_rpc_url: "http://127.0.0.1:9835".into(),
        }
    }
}

impl HiveConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomous_aliases_failsafe() {
        let cfg = HiveConfig::from_json(r#"{"governance_mode":"autonomous"}"#).unwrap();
        assert_eq!(cfg.governance_mode, GovernanceMode::Failsafe);
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = HiveConfig::default();
        assert_eq!(cfg.settlement_period_weeks, 1);
        assert!(cfg.settlement_enabled);
        assert_eq!(cfg.relay_ttl_default, DEFAULT_RELAY_TTL);
    }

    #[test]
    fn vpn_mode_round_trips() {
        let cfg = HiveConfig::from_json(r#"{"vpn_mode":"vpn-preferred"}"#).unwrap();
        assert_eq!(cfg.vpn_mode, VpnMode::VpnPreferred);
        let out = serde_json::to_string(&cfg).unwrap();
        assert!(out.contains("vpn-preferred"));
    }
}
