//! Fleet profile catalog: per-role baselines, service rosters, population.

use crate::classify::clamp_metric;
use crate::error::EngineError;
use crate::models::{ServerRole, ServerState, ServiceStatus};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use time::OffsetDateTime;

const REGIONS: [&str; 4] = ["us-east-1", "us-west-2", "eu-west-1", "ap-southeast-1"];

/// `base ± variation` for one usage metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBaseline {
    pub base: f64,
    pub variation: f64,
}

impl MetricBaseline {
    pub const fn new(base: f64, variation: f64) -> Self {
        Self { base, variation }
    }

    /// Draw `base ± uniform(variation)` clamped to `[5, 98]`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let spread = self.variation.abs();
        clamp_metric(self.base + rng.gen_range(-spread..=spread))
    }
}

/// Immutable description of one server role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub role: ServerRole,
    pub count: usize,
    pub cpu: MetricBaseline,
    pub memory: MetricBaseline,
    pub disk: MetricBaseline,
    pub services: Vec<String>,
    pub min_services: usize,
    pub max_services: usize,
    #[serde(default = "default_process_count")]
    pub base_processes: u32,
}

fn default_process_count() -> u32 {
    120
}

impl ServerProfile {
    pub fn baselines(&self) -> [MetricBaseline; 3] {
        [self.cpu, self.memory, self.disk]
    }

    /// Pick the running service set for a new server.
    pub fn pick_services<R: Rng + ?Sized>(&self, rng: &mut R) -> BTreeMap<String, ServiceStatus> {
        let upper = self.max_services.min(self.services.len());
        let lower = self.min_services.min(upper);
        let wanted = rng.gen_range(lower..=upper);
        self.services
            .choose_multiple(rng, wanted)
            .map(|name| (name.clone(), ServiceStatus::Running))
            .collect()
    }
}

/// Baseline levels drawn once for a server at creation, in metric order
/// (cpu, memory, disk), with the variation each metric may jitter by.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerBaseline {
    pub levels: [f64; 3],
    pub variation: [f64; 3],
}

impl ServerBaseline {
    pub fn draw<R: Rng + ?Sized>(profile: &ServerProfile, rng: &mut R) -> Self {
        let baselines = profile.baselines();
        Self {
            levels: baselines.map(|b| b.draw(&mut *rng)),
            variation: baselines.map(|b| b.variation.abs()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileCatalog {
    profiles: Vec<ServerProfile>,
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        default_catalog()
    }
}

impl ProfileCatalog {
    pub fn new(profiles: Vec<ServerProfile>) -> Result<Self, EngineError> {
        let catalog = Self { profiles };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, EngineError> {
        let profiles: Vec<ServerProfile> = serde_yaml::from_str(yaml)?;
        Self::new(profiles)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let txt = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&txt)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.profiles.is_empty() {
            return Err(EngineError::InvalidCatalog("no profiles".into()));
        }
        for p in &self.profiles {
            if p.min_services > p.max_services {
                return Err(EngineError::InvalidCatalog(format!(
                    "{}: min_services {} > max_services {}",
                    p.role, p.min_services, p.max_services
                )));
            }
            if p.services.is_empty() {
                return Err(EngineError::InvalidCatalog(format!("{}: empty service roster", p.role)));
            }
        }
        Ok(())
    }

    pub fn profiles(&self) -> &[ServerProfile] {
        &self.profiles
    }

    /// Sum of all profile population counts.
    pub fn total_count(&self) -> usize {
        self.profiles.iter().map(|p| p.count).sum()
    }

    /// Profile for a fleet index. Profiles partition `[0, total)` by
    /// cumulative count in declaration order; indexes past the end fall back
    /// to the first profile.
    pub fn assign(&self, index: usize) -> &ServerProfile {
        let mut cumulative = 0;
        for profile in &self.profiles {
            cumulative += profile.count;
            if index < cumulative {
                return profile;
            }
        }
        &self.profiles[0]
    }
}

/// Build a fresh server for `profile`. `ordinal` is the 1-based position of
/// the server within its role and drives the hostname and address.
pub fn spawn_server<R: Rng + ?Sized>(
    index: usize,
    ordinal: usize,
    profile: &ServerProfile,
    now: OffsetDateTime,
    rng: &mut R,
) -> (ServerState, ServerBaseline) {
    let baseline = ServerBaseline::draw(profile, rng);
    let process_jitter = (profile.base_processes / 5).max(1);
    let process_count =
        profile.base_processes.saturating_sub(process_jitter) + rng.gen_range(0..=process_jitter * 2);

    let mut state = ServerState {
        hostname: hostname_for(profile.role, ordinal),
        ip: ip_for(profile.role, ordinal),
        region: region_for(index).to_string(),
        role: profile.role,
        cpu_usage: baseline.levels[0],
        memory_usage_percent: baseline.levels[1],
        disk_usage_percent: baseline.levels[2],
        network: Default::default(),
        zombie_count: 0,
        process_count,
        services: profile.pick_services(rng),
        alerts: Vec::new(),
        status: crate::models::HealthStatus::Normal,
        last_updated: now,
    };
    state.refresh_status();
    (state, baseline)
}

pub fn hostname_for(role: ServerRole, ordinal: usize) -> String {
    format!("{}-{:02}", role.as_str(), ordinal)
}

pub fn region_for(index: usize) -> &'static str {
    REGIONS[index % REGIONS.len()]
}

pub fn ip_for(role: ServerRole, ordinal: usize) -> String {
    let subnet = ServerRole::ALL.iter().position(|r| *r == role).unwrap_or(0) + 1;
    format!("10.{}.{}.{}", subnet, ordinal / 240, 10 + ordinal % 240)
}

fn roster(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// 50-server reference fleet
pub fn default_catalog() -> ProfileCatalog {
    use MetricBaseline as B;
    let profile = |role, count, cpu, memory, disk, services: &[&str], min, max, procs| ServerProfile {
        role,
        count,
        cpu,
        memory,
        disk,
        services: roster(services),
        min_services: min,
        max_services: max,
        base_processes: procs,
    };

    ProfileCatalog {
        profiles: vec![
            profile(ServerRole::Web, 10, B::new(35.0, 15.0), B::new(45.0, 15.0), B::new(40.0, 10.0),
                &["nginx", "php-fpm", "node_exporter", "filebeat", "certbot"], 2, 4, 140),
            profile(ServerRole::App, 8, B::new(45.0, 15.0), B::new(55.0, 15.0), B::new(35.0, 10.0),
                &["tomcat", "java-app", "supervisord", "node_exporter", "filebeat"], 2, 4, 180),
            profile(ServerRole::Db, 5, B::new(40.0, 10.0), B::new(60.0, 10.0), B::new(55.0, 10.0),
                &["postgresql", "mysql", "pgbouncer", "node_exporter", "backup-agent"], 2, 4, 110),
            profile(ServerRole::Cache, 4, B::new(25.0, 10.0), B::new(60.0, 15.0), B::new(30.0, 10.0),
                &["redis", "memcached", "node_exporter"], 1, 3, 80),
            profile(ServerRole::Api, 6, B::new(40.0, 15.0), B::new(45.0, 10.0), B::new(30.0, 10.0),
                &["nginx", "gunicorn", "node_exporter", "filebeat"], 2, 4, 150),
            profile(ServerRole::Monitor, 2, B::new(20.0, 10.0), B::new(35.0, 10.0), B::new(45.0, 10.0),
                &["prometheus", "grafana", "alertmanager", "loki"], 2, 4, 90),
            profile(ServerRole::K8sMaster, 3, B::new(30.0, 10.0), B::new(40.0, 10.0), B::new(35.0, 10.0),
                &["kube-apiserver", "kube-scheduler", "kube-controller-manager", "kubelet", "containerd"], 3, 5, 160),
            profile(ServerRole::K8sWorker, 9, B::new(45.0, 15.0), B::new(50.0, 15.0), B::new(40.0, 10.0),
                &["kubelet", "containerd", "kube-proxy", "node_exporter"], 2, 4, 220),
            profile(ServerRole::K8sEtcd, 3, B::new(25.0, 10.0), B::new(40.0, 10.0), B::new(45.0, 10.0),
                &["etcd", "node_exporter"], 1, 2, 70),
        ],
    }
}
