//! Incident detection agent.
//!
//! Scans a fleet snapshot against a fixed, ordered set of failure
//! predicates, suppresses repeats of the same incident id inside the dedup
//! window and asks an injected [`NarrativeProvider`] for an analysis of every
//! new incident. Provider failures and timeouts never drop an incident: the
//! narrative is swapped for [`NARRATIVE_FALLBACK`].

use crate::error::NarrativeError;
use crate::models::ServerState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Narrative body used when the provider fails or times out.
pub const NARRATIVE_FALLBACK: &str =
    "Automated analysis unavailable: the narrative service did not answer. Review the detected conditions manually.";

/// Services whose stopped state is an incident on its own.
pub const CRITICAL_SERVICES: [&str; 8] = [
    "nginx",
    "postgresql",
    "mysql",
    "redis",
    "kubelet",
    "etcd",
    "kube-apiserver",
    "containerd",
];

pub const HIGH_CPU_THRESHOLD: f64 = 90.0;
pub const HIGH_MEMORY_THRESHOLD: f64 = 85.0;
pub const HIGH_DISK_THRESHOLD: f64 = 80.0;

/// External text generator. One call per new incident.
#[async_trait]
pub trait NarrativeProvider: Send + Sync {
    async fn generate_narrative(&self, prompt: &str) -> Result<String, NarrativeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionId {
    HighCpu,
    HighMemory,
    HighDisk,
    NetworkErrors,
    ZombieProcesses,
    ServiceStopped,
}

impl ConditionId {
    /// Evaluation order, also the order ids are joined in.
    pub const ALL: [ConditionId; 6] = [
        ConditionId::HighCpu,
        ConditionId::HighMemory,
        ConditionId::HighDisk,
        ConditionId::NetworkErrors,
        ConditionId::ZombieProcesses,
        ConditionId::ServiceStopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionId::HighCpu => "high_cpu",
            ConditionId::HighMemory => "high_memory",
            ConditionId::HighDisk => "high_disk",
            ConditionId::NetworkErrors => "network_errors",
            ConditionId::ZombieProcesses => "zombie_processes",
            ConditionId::ServiceStopped => "service_stopped",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConditionId::HighCpu => "High CPU usage",
            ConditionId::HighMemory => "High memory usage",
            ConditionId::HighDisk => "High disk usage",
            ConditionId::NetworkErrors => "Network errors",
            ConditionId::ZombieProcesses => "Zombie processes",
            ConditionId::ServiceStopped => "Critical service stopped",
        }
    }

    /// Current value rendered for the prompt, `None` when the predicate does not hold.
    fn check(&self, state: &ServerState) -> Option<String> {
        match self {
            ConditionId::HighCpu => {
                (state.cpu_usage > HIGH_CPU_THRESHOLD).then(|| format!("{:.1}%", state.cpu_usage))
            }
            ConditionId::HighMemory => (state.memory_usage_percent > HIGH_MEMORY_THRESHOLD)
                .then(|| format!("{:.1}%", state.memory_usage_percent)),
            ConditionId::HighDisk => (state.disk_usage_percent > HIGH_DISK_THRESHOLD)
                .then(|| format!("{:.1}%", state.disk_usage_percent)),
            ConditionId::NetworkErrors => state.network.has_errors().then(|| {
                format!(
                    "rx_errors={}, tx_errors={}",
                    state.network.rx_errors, state.network.tx_errors
                )
            }),
            ConditionId::ZombieProcesses => {
                (state.zombie_count > 0).then(|| state.zombie_count.to_string())
            }
            ConditionId::ServiceStopped => {
                let stopped: Vec<&str> = state
                    .stopped_services()
                    .filter(|s| CRITICAL_SERVICES.contains(s))
                    .collect();
                (!stopped.is_empty()).then(|| stopped.join(", "))
            }
        }
    }
}

/// One predicate that held for a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionMatch {
    pub condition: ConditionId,
    pub name: String,
    pub value: String,
}

/// Every failing predicate for `state`, in evaluation order.
pub fn evaluate(state: &ServerState) -> Vec<ConditionMatch> {
    ConditionId::ALL
        .iter()
        .filter_map(|condition| {
            condition.check(state).map(|value| ConditionMatch {
                condition: *condition,
                name: condition.label().to_string(),
                value,
            })
        })
        .collect()
}

/// `hostname-cond1-cond2...`
pub fn incident_id(hostname: &str, conditions: &[ConditionMatch]) -> String {
    let mut id = hostname.to_string();
    for m in conditions {
        id.push('-');
        id.push_str(m.condition.as_str());
    }
    id
}

pub fn build_prompt(state: &ServerState, conditions: &[ConditionMatch]) -> String {
    let mut prompt = format!(
        "Server {} ({}, {}, {}) reports the following problems:\n",
        state.hostname, state.role, state.ip, state.region
    );
    for m in conditions {
        prompt.push_str(&format!("- {}: {}\n", m.name, m.value));
    }
    prompt.push_str(
        "Analyse the probable root cause of these problems and propose concrete remediation steps.",
    );
    prompt
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub metadata: ReportMetadata,
    pub narrative: String,
    /// True when `narrative` is the fallback text.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub hostname: String,
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
    pub conditions: Vec<ConditionMatch>,
    pub report: IncidentReport,
}

/// Detection tuning. Durations are plain numbers so the policy reads
/// straight from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentPolicy {
    pub dedup_window_secs: i64,
    pub retention_secs: i64,
    pub history_limit: usize,
    pub narrative_timeout_ms: u64,
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self {
            dedup_window_secs: 3600,
            retention_secs: 24 * 3600,
            history_limit: 10,
            narrative_timeout_ms: 30_000,
        }
    }
}

impl IncidentPolicy {
    fn dedup_window(&self) -> Duration {
        Duration::seconds(self.dedup_window_secs)
    }

    fn retention(&self) -> Duration {
        Duration::seconds(self.retention_secs)
    }
}

#[derive(Debug, Default)]
struct IncidentBook {
    active: Vec<Incident>,
    history: VecDeque<Incident>,
    last_reported: HashMap<String, OffsetDateTime>,
}

impl IncidentBook {
    fn prune(&mut self, now: OffsetDateTime, policy: &IncidentPolicy) -> usize {
        let before = self.active.len();
        self.active.retain(|i| now - i.detected_at < policy.retention());
        let dedup = policy.dedup_window();
        self.last_reported.retain(|_, at| now - *at < dedup);
        before - self.active.len()
    }

    /// Reserve `id` unless it was reported inside the dedup window.
    fn claim(&mut self, id: &str, now: OffsetDateTime, window: Duration) -> bool {
        match self.last_reported.get(id) {
            Some(at) if now - *at < window => false,
            _ => {
                self.last_reported.insert(id.to_string(), now);
                true
            }
        }
    }

    fn record(&mut self, incident: Incident, limit: usize) {
        self.active.push(incident.clone());
        self.history.push_back(incident);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

pub struct IncidentDetector {
    provider: Arc<dyn NarrativeProvider>,
    policy: IncidentPolicy,
    book: RwLock<IncidentBook>,
}

impl IncidentDetector {
    pub fn new(provider: Arc<dyn NarrativeProvider>, policy: IncidentPolicy) -> Self {
        Self {
            provider,
            policy,
            book: RwLock::new(IncidentBook::default()),
        }
    }

    pub fn policy(&self) -> &IncidentPolicy {
        &self.policy
    }

    /// Scan one snapshot, servers one at a time. Returns the incidents
    /// created by this pass.
    pub async fn scan(&self, snapshot: &[ServerState], now: OffsetDateTime) -> Vec<Incident> {
        self.prune(now).await;
        if snapshot.is_empty() {
            debug!("empty fleet snapshot, nothing to scan");
            return Vec::new();
        }

        let mut created = Vec::new();
        for server in snapshot {
            if server.hostname.trim().is_empty() {
                warn!(ip = %server.ip, "snapshot entry without hostname skipped");
                continue;
            }
            let conditions = evaluate(server);
            if conditions.is_empty() {
                continue;
            }

            let id = incident_id(&server.hostname, &conditions);
            let claimed = self
                .book
                .write()
                .await
                .claim(&id, now, self.policy.dedup_window());
            if !claimed {
                debug!(incident = %id, "incident suppressed inside dedup window");
                continue;
            }

            let prompt = build_prompt(server, &conditions);
            let (narrative, degraded) = match self.request_narrative(&prompt).await {
                Ok(text) => (text, false),
                Err(e) => {
                    warn!(incident = %id, error = %e, "narrative unavailable, using fallback");
                    (NARRATIVE_FALLBACK.to_string(), true)
                }
            };

            let incident = Incident {
                id,
                hostname: server.hostname.clone(),
                detected_at: now,
                report: IncidentReport {
                    metadata: ReportMetadata {
                        detected_at: now,
                        problems: conditions
                            .iter()
                            .map(|m| format!("{}: {}", m.name, m.value))
                            .collect(),
                    },
                    narrative,
                    degraded,
                },
                conditions,
            };
            info!(incident = %incident.id, hostname = %incident.hostname, degraded, "new incident recorded");
            self.book
                .write()
                .await
                .record(incident.clone(), self.policy.history_limit);
            created.push(incident);
        }
        created
    }

    async fn request_narrative(&self, prompt: &str) -> Result<String, NarrativeError> {
        let limit = std::time::Duration::from_millis(self.policy.narrative_timeout_ms);
        match tokio::time::timeout(limit, self.provider.generate_narrative(prompt)).await {
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(NarrativeError::Request("empty narrative".to_string()))
            }
            Ok(result) => result,
            Err(_) => Err(NarrativeError::Timeout(self.policy.narrative_timeout_ms)),
        }
    }

    /// Drop active incidents older than the retention window.
    pub async fn prune(&self, now: OffsetDateTime) -> usize {
        let removed = self.book.write().await.prune(now, &self.policy);
        if removed > 0 {
            debug!(removed, "expired incidents pruned");
        }
        removed
    }

    /// Latest incidents, newest last.
    pub async fn recent(&self) -> Vec<Incident> {
        self.book.read().await.history.iter().cloned().collect()
    }

    pub async fn active(&self) -> Vec<Incident> {
        self.book.read().await.active.clone()
    }

    pub async fn active_count(&self) -> usize {
        self.book.read().await.active.len()
    }
}
