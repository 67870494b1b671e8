//! Fleet data model shared by every producer and consumer of server state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Role tag of a simulated server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerRole {
    Web,
    App,
    Db,
    Cache,
    Api,
    Monitor,
    K8sMaster,
    K8sWorker,
    K8sEtcd,
}

impl ServerRole {
    pub const ALL: [ServerRole; 9] = [
        ServerRole::Web,
        ServerRole::App,
        ServerRole::Db,
        ServerRole::Cache,
        ServerRole::Api,
        ServerRole::Monitor,
        ServerRole::K8sMaster,
        ServerRole::K8sWorker,
        ServerRole::K8sEtcd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRole::Web => "web",
            ServerRole::App => "app",
            ServerRole::Db => "db",
            ServerRole::Cache => "cache",
            ServerRole::Api => "api",
            ServerRole::Monitor => "monitor",
            ServerRole::K8sMaster => "k8s-master",
            ServerRole::K8sWorker => "k8s-worker",
            ServerRole::K8sEtcd => "k8s-etcd",
        }
    }

    /// Traffic multiplier applied to the network byte walk.
    /// Edge-facing roles move more bytes.
    pub fn traffic_multiplier(&self) -> f64 {
        match self {
            ServerRole::Web | ServerRole::Api => 2.5,
            ServerRole::Cache | ServerRole::K8sWorker => 1.5,
            ServerRole::Db | ServerRole::App => 1.2,
            ServerRole::Monitor | ServerRole::K8sMaster | ServerRole::K8sEtcd => 0.6,
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived health state. Ordered so that `max` gives the worst one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Normal,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Normal => "normal",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
}

/// Cumulative network counters of the primary interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
}

impl NetworkStats {
    pub fn has_errors(&self) -> bool {
        self.rx_errors > 0 || self.tx_errors > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Error,
    Warning,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Error => "error",
            AlertSeverity::Warning => "warning",
        }
    }
}

/// Number of leading message characters that take part in the dedup key.
pub const DEDUP_PREFIX_CHARS: usize = 15;

/// Human-readable alert attached to a server snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// `(type, severity, message[0:15])`
pub type DedupKey = (String, AlertSeverity, String);

impl Alert {
    pub fn dedup_key(&self) -> DedupKey {
        let prefix: String = self.message.chars().take(DEDUP_PREFIX_CHARS).collect();
        (self.kind.clone(), self.severity, prefix)
    }
}

/// Current snapshot of one simulated server.
///
/// `status` always equals `classify` of the three usage metrics; producers
/// set it through [`ServerState::refresh_status`] and nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub hostname: String,
    pub ip: String,
    pub region: String,
    pub role: ServerRole,
    pub cpu_usage: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub network: NetworkStats,
    pub zombie_count: u32,
    pub process_count: u32,
    pub services: BTreeMap<String, ServiceStatus>,
    pub alerts: Vec<Alert>,
    pub status: HealthStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl ServerState {
    pub fn metrics(&self) -> [f64; 3] {
        [self.cpu_usage, self.memory_usage_percent, self.disk_usage_percent]
    }

    pub fn set_metrics(&mut self, metrics: [f64; 3]) {
        let [cpu, memory, disk] = metrics;
        self.cpu_usage = cpu;
        self.memory_usage_percent = memory;
        self.disk_usage_percent = disk;
    }

    /// Recompute `status` from the current metrics.
    pub fn refresh_status(&mut self) {
        self.status = crate::classify::classify_state(self);
    }

    pub fn stopped_services(&self) -> impl Iterator<Item = &str> {
        self.services
            .iter()
            .filter(|(_, status)| **status == ServiceStatus::Stopped)
            .map(|(name, _)| name.as_str())
    }
}
