/*!
Builders for hand-made snapshots and scenario sets.
*/

use anyhow::Result;
use fleetsim_engine::alerts::AlertTemplate;
use fleetsim_engine::models::NetworkStats;
use fleetsim_engine::overlay::MetricFloors;
use fleetsim_engine::profiles::{ip_for, region_for};
use fleetsim_engine::{
    AlertSeverity, HealthStatus, ScenarioSet, ScenarioWindow, ServerRole, ServerState,
    ServiceStatus,
};
use std::collections::BTreeMap;
use time::macros::datetime;
use time::OffsetDateTime;

/// Fluent `ServerState` builder; status is always derived from the metrics.
#[derive(Debug, Clone)]
pub struct ServerStateBuilder {
    state: ServerState,
}

impl ServerStateBuilder {
    pub fn new(hostname: &str, role: ServerRole) -> Self {
        Self {
            state: ServerState {
                hostname: hostname.to_string(),
                ip: ip_for(role, 1),
                region: region_for(0).to_string(),
                role,
                cpu_usage: 30.0,
                memory_usage_percent: 40.0,
                disk_usage_percent: 35.0,
                network: NetworkStats::default(),
                zombie_count: 0,
                process_count: 120,
                services: BTreeMap::new(),
                alerts: Vec::new(),
                status: HealthStatus::Normal,
                last_updated: datetime!(2024-05-01 12:00 UTC),
            },
        }
    }

    pub fn cpu(mut self, v: f64) -> Self {
        self.state.cpu_usage = v;
        self
    }

    pub fn memory(mut self, v: f64) -> Self {
        self.state.memory_usage_percent = v;
        self
    }

    pub fn disk(mut self, v: f64) -> Self {
        self.state.disk_usage_percent = v;
        self
    }

    pub fn running(mut self, service: &str) -> Self {
        self.state.services.insert(service.to_string(), ServiceStatus::Running);
        self
    }

    pub fn stopped(mut self, service: &str) -> Self {
        self.state.services.insert(service.to_string(), ServiceStatus::Stopped);
        self
    }

    pub fn zombies(mut self, count: u32) -> Self {
        self.state.zombie_count = count;
        self
    }

    pub fn network_errors(mut self, rx: u64, tx: u64) -> Self {
        self.state.network.rx_errors = rx;
        self.state.network.tx_errors = tx;
        self
    }

    pub fn at(mut self, ts: OffsetDateTime) -> Self {
        self.state.last_updated = ts;
        self
    }

    pub fn build(mut self) -> ServerState {
        self.state.refresh_status();
        self.state
    }
}

/// Chains scenario windows; floor and alert setters apply to the last window.
#[derive(Debug, Clone, Default)]
pub struct ScenarioBuilder {
    windows: Vec<ScenarioWindow>,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(mut self, hostname: &str, start_hours_ago: f64, end_hours_ago: f64) -> Self {
        self.windows.push(ScenarioWindow {
            hostname: hostname.to_string(),
            start_hours_ago,
            end_hours_ago,
            floors: MetricFloors::default(),
            alerts: Vec::new(),
            detail: None,
            stop_services: Vec::new(),
        });
        self
    }

    fn last(&mut self) -> Option<&mut ScenarioWindow> {
        self.windows.last_mut()
    }

    pub fn cpu_floor(mut self, v: f64) -> Self {
        if let Some(w) = self.last() {
            w.floors.cpu = Some(v);
        }
        self
    }

    pub fn memory_floor(mut self, v: f64) -> Self {
        if let Some(w) = self.last() {
            w.floors.memory = Some(v);
        }
        self
    }

    pub fn disk_floor(mut self, v: f64) -> Self {
        if let Some(w) = self.last() {
            w.floors.disk = Some(v);
        }
        self
    }

    pub fn alert(mut self, kind: &str, severity: AlertSeverity, text: &str) -> Self {
        if let Some(w) = self.last() {
            w.alerts.push(AlertTemplate::new(kind, severity, text));
        }
        self
    }

    pub fn detail(mut self, detail: &str) -> Self {
        if let Some(w) = self.last() {
            w.detail = Some(detail.to_string());
        }
        self
    }

    pub fn stop_service(mut self, service: &str) -> Self {
        if let Some(w) = self.last() {
            w.stop_services.push(service.to_string());
        }
        self
    }

    pub fn build(self) -> Result<ScenarioSet> {
        Ok(ScenarioSet::new(self.windows)?)
    }
}
