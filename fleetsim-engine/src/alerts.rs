//! Alert synthesizer: severity-keyed template pools, placeholder rendering,
//! dedup on `(type, severity, message[0:15])`.

use crate::models::{Alert, AlertSeverity, ServerState};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;

/// Message template. Placeholders: `{value}`, `{role}`, `{hostname}`, `{detail}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTemplate {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: AlertSeverity,
    pub text: String,
}

impl AlertTemplate {
    pub fn new(kind: &str, severity: AlertSeverity, text: &str) -> Self {
        Self {
            kind: kind.to_string(),
            severity,
            text: text.to_string(),
        }
    }

    /// Substitute placeholders with concrete values from `state`.
    /// `{value}` takes the metric matching the template type; `detail` is an
    /// optional caller fragment.
    pub fn render(&self, state: &ServerState, detail: Option<&str>) -> String {
        let value = metric_value(&self.kind, state)
            .map(format_value)
            .unwrap_or_else(|| "n/a".to_string());
        self.text
            .replace("{value}", &value)
            .replace("{role}", state.role.as_str())
            .replace("{hostname}", &state.hostname)
            .replace("{detail}", detail.unwrap_or(""))
    }

    pub fn instantiate(&self, state: &ServerState, detail: Option<&str>, now: OffsetDateTime) -> Alert {
        Alert {
            kind: self.kind.clone(),
            severity: self.severity,
            message: self.render(state, detail),
            timestamp: now,
        }
    }
}

/// Metric a template type refers to, if any.
pub fn metric_value(kind: &str, state: &ServerState) -> Option<f64> {
    match kind {
        "cpu" => Some(state.cpu_usage),
        "memory" => Some(state.memory_usage_percent),
        "disk" => Some(state.disk_usage_percent),
        "network" => Some((state.network.rx_errors + state.network.tx_errors) as f64),
        "process" => Some(f64::from(state.zombie_count)),
        _ => None,
    }
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.1}")
    }
}

#[derive(Debug, Clone)]
pub struct AlertSynthesizer {
    pools: BTreeMap<AlertSeverity, Vec<AlertTemplate>>,
}

impl Default for AlertSynthesizer {
    fn default() -> Self {
        use AlertSeverity::*;
        let t = AlertTemplate::new;
        let mut pools = BTreeMap::new();
        pools.insert(
            Critical,
            vec![
                t("cpu", Critical, "CPU usage critical at {value}% on {role} node"),
                t("memory", Critical, "Memory exhausted, {value}% used on {role} node"),
                t("disk", Critical, "Disk almost full, {value}% used on {role} node"),
                t("service", Critical, "Critical service down on {role} node{detail}"),
            ],
        );
        pools.insert(
            Error,
            vec![
                t("service", Error, "Service crashed on {role} node{detail}"),
                t("network", Error, "Interface errors on {role} node: {value} errors"),
                t("process", Error, "Zombie processes on {role} node: {value}"),
                t("application", Error, "Application error rate spiking on {role} node{detail}"),
            ],
        );
        pools.insert(
            Warning,
            vec![
                t("cpu", Warning, "CPU usage elevated at {value}% on {role} node"),
                t("memory", Warning, "Memory pressure at {value}% on {role} node"),
                t("disk", Warning, "Disk usage high at {value}% on {role} node"),
                t("network", Warning, "Packet retransmits rising on {role} node"),
            ],
        );
        Self { pools }
    }
}

impl AlertSynthesizer {
    pub fn with_pools(pools: BTreeMap<AlertSeverity, Vec<AlertTemplate>>) -> Self {
        Self { pools }
    }

    pub fn pool(&self, severity: AlertSeverity) -> &[AlertTemplate] {
        self.pools.get(&severity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Uniformly pick a template of `severity` and render it for `state`.
    /// Returns `None` when the pool is empty.
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        severity: AlertSeverity,
        state: &ServerState,
        detail: Option<&str>,
        now: OffsetDateTime,
        rng: &mut R,
    ) -> Option<Alert> {
        let template = self.pool(severity).choose(rng)?;
        Some(template.instantiate(state, detail, now))
    }
}

/// Keep the first alert of each dedup key, preserving order.
pub fn dedup_alerts(alerts: Vec<Alert>) -> Vec<Alert> {
    let mut seen = HashSet::new();
    alerts
        .into_iter()
        .filter(|alert| seen.insert(alert.dedup_key()))
        .collect()
}

/// Append `alert` unless an alert with the same dedup key is present.
pub fn push_unique(alerts: &mut Vec<Alert>, alert: Alert) -> bool {
    let key = alert.dedup_key();
    if alerts.iter().any(|a| a.dedup_key() == key) {
        return false;
    }
    alerts.push(alert);
    true
}
