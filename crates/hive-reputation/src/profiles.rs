//! Credential domain profiles: immutable configuration loaded at startup,
//! never mutated at runtime.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

pub const VALID_DOMAINS: [&str; 4] = ["hive:advisor", "hive:node", "hive:client", "agent:general"];

#[derive(Debug, Clone)]
pub struct CredentialProfile {
    pub domain: &'static str,
    pub description: &'static str,
    pub required_metrics: &'static [&'static str],
    pub optional_metrics: &'static [&'static str],
    /// `(metric, lo, hi)` inclusive ranges for numeric validation.
    pub metric_ranges: &'static [(&'static str, f64, f64)],
}

impl CredentialProfile {
    pub fn range_for(&self, metric: &str) -> Option<(f64, f64)> {
        self.metric_ranges
            .iter()
            .find(|(name, _, _)| *name == metric)
            .map(|(_, lo, hi)| (*lo, *hi))
    }

    fn knows(&self, metric: &str) -> bool {
        self.required_metrics.contains(&metric) || self.optional_metrics.contains(&metric)
    }
}

static PROFILES: Lazy<HashMap<&'static str, CredentialProfile>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(
        "hive:advisor",
        CredentialProfile {
            domain: "hive:advisor",
            description: "Fleet advisor performance credential",
            required_metrics: &["revenue_delta_pct", "actions_taken", "uptime_pct", "channels_managed"],
            optional_metrics: &["sla_violations", "response_time_ms"],
            metric_ranges: &[
                ("revenue_delta_pct", -100.0, 1000.0),
                ("actions_taken", 0.0, 100_000.0),
                ("uptime_pct", 0.0, 100.0),
                ("channels_managed", 0.0, 10_000.0),
            ],
        },
    );
    map.insert(
        "hive:node",
        CredentialProfile {
            domain: "hive:node",
            description: "Lightning node routing credential",
            required_metrics: &["routing_reliability", "uptime", "htlc_success_rate", "avg_fee_ppm"],
            optional_metrics: &["capacity_sats", "forward_count", "force_close_count"],
            metric_ranges: &[
                ("routing_reliability", 0.0, 1.0),
                ("uptime", 0.0, 1.0),
                ("htlc_success_rate", 0.0, 1.0),
                ("avg_fee_ppm", 0.0, 50_000.0),
            ],
        },
    );
    map.insert(
        "hive:client",
        CredentialProfile {
            domain: "hive:client",
            description: "Node operator client credential",
            required_metrics: &["payment_timeliness", "sla_reasonableness", "communication_quality"],
            optional_metrics: &["dispute_count", "contract_duration_days"],
            metric_ranges: &[
                ("payment_timeliness", 0.0, 1.0),
                ("sla_reasonableness", 0.0, 1.0),
                ("communication_quality", 0.0, 1.0),
            ],
        },
    );
    map.insert(
        "agent:general",
        CredentialProfile {
            domain: "agent:general",
            description: "General AI agent performance credential",
            required_metrics: &["task_completion_rate", "accuracy", "response_time_ms", "tasks_evaluated"],
            optional_metrics: &["cost_efficiency", "error_rate"],
            metric_ranges: &[
                ("task_completion_rate", 0.0, 1.0),
                ("accuracy", 0.0, 1.0),
                ("response_time_ms", 0.0, 600_000.0),
                ("tasks_evaluated", 0.0, 1_000_000.0),
            ],
        },
    );
    map
});

pub fn profile_for(domain: &str) -> Option<&'static CredentialProfile> {
    PROFILES.get(domain)
}

/// Validate metrics against the domain profile: all required metrics
/// present, every present metric known, numeric metrics within range.
pub fn validate_metrics(domain: &str, metrics: &Map<String, Value>) -> Result<(), String> {
    let profile = profile_for(domain).ok_or_else(|| format!("unknown domain: {domain}"))?;

    for required in profile.required_metrics {
        if !metrics.contains_key(*required) {
            return Err(format!("missing required metric: {required}"));
        }
    }

    for key in metrics.keys() {
        if !profile.knows(key) {
            return Err(format!("unknown metric: {key}"));
        }
    }

    for (key, value) in metrics {
        if let Some((lo, hi)) = profile.range_for(key) {
            let Some(n) = value.as_f64() else {
                return Err(format!("metric {key} must be numeric"));
            };
            if n < lo || n > hi {
                return Err(format!("metric {key} value {n} out of range [{lo}, {hi}]"));
            }
        }
    }

    Ok(())
}

/// 0-100 score from a credential's required metrics, each normalized into
/// [0,1] by its profile range and equally weighted. Unknown domains and
/// empty metric sets score a neutral 50.
pub fn score_metrics(domain: &str, metrics: &Map<String, Value>) -> f64 {
    let Some(profile) = profile_for(domain) else {
        return 50.0;
    };

    let mut scores = Vec::new();
    for key in profile.required_metrics {
        let Some(value) = metrics.get(*key).and_then(Value::as_f64) else {
            continue;
        };
        if let Some((lo, hi)) = profile.range_for(key) {
            if hi > lo {
                scores.push(((value - lo) / (hi - lo)).clamp(0.0, 1.0));
            }
        }
    }

    if scores.is_empty() {
        return 50.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_metrics() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("routing_reliability".into(), json!(0.95));
        m.insert("uptime".into(), json!(0.99));
        m.insert("htlc_success_rate".into(), json!(0.97));
        m.insert("avg_fee_ppm".into(), json!(150));
        m
    }

    #[test]
    fn valid_node_metrics_pass() {
        assert!(validate_metrics("hive:node", &node_metrics()).is_ok());
    }

    #[test]
    fn missing_required_metric_fails() {
        let mut m = node_metrics();
        m.remove("uptime");
        let err = validate_metrics("hive:node", &m).unwrap_err();
        assert!(err.contains("uptime"));
    }

    #[test]
    fn unknown_metric_fails() {
        let mut m = node_metrics();
        m.insert("bogus".into(), json!(1));
        assert!(validate_metrics("hive:node", &m).is_err());
    }

    #[test]
    fn out_of_range_fails() {
        let mut m = node_metrics();
        m.insert("routing_reliability".into(), json!(1.5));
        assert!(validate_metrics("hive:node", &m).is_err());
    }

    #[test]
    fn unknown_domain_fails() {
        assert!(validate_metrics("hive:bogus", &node_metrics()).is_err());
    }

    #[test]
    fn score_normalizes_required_metrics() {
        let mut m = Map::new();
        m.insert("routing_reliability".into(), json!(1.0));
        m.insert("uptime".into(), json!(1.0));
        m.insert("htlc_success_rate".into(), json!(1.0));
        m.insert("avg_fee_ppm".into(), json!(0));
        // Three perfect metrics plus avg_fee_ppm at range floor.
        let score = score_metrics("hive:node", &m);
        assert!((score - 75.0).abs() < 1e-9);
    }
}
