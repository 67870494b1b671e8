//! Deterministic scenario overlay for pre-baked 24h datasets.
//!
//! Walks a fixed 10-minute timeline ending at `end`. Every point draws fresh
//! baselines for every server (no hysteresis), then active scenario windows
//! force their metric floors and alerts onto the targeted hosts. Status comes
//! from `classify`, never from the scenario itself.

use crate::alerts::{dedup_alerts, AlertTemplate};
use crate::classify::clamp_metric;
use crate::error::EngineError;
use crate::history::{HISTORY_CAPACITY, HISTORY_RESOLUTION_MINUTES};
use crate::load::load_multiplier;
use crate::models::{Alert, AlertSeverity, HealthStatus, ServerRole, ServerState, ServiceStatus};
use crate::profiles::{spawn_server, ProfileCatalog};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use time::{Duration, OffsetDateTime, Time};
use tracing::{debug, warn};

/// Upward jitter added on top of a forced floor.
const FLOOR_JITTER: f64 = 2.0;

/// Latest timeline boundary at or before `now` (whole 10-minute step).
pub fn step_boundary(now: OffsetDateTime) -> OffsetDateTime {
    let step = HISTORY_RESOLUTION_MINUTES as u8;
    let minute = now.minute() - now.minute() % step;
    Time::from_hms(now.hour(), minute, 0)
        .map(|t| now.replace_time(t))
        .unwrap_or(now)
}

/// Optional lower bounds forced onto the usage metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricFloors {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub disk: Option<f64>,
}

impl MetricFloors {
    fn as_array(&self) -> [Option<f64>; 3] {
        [self.cpu, self.memory, self.disk]
    }
}

/// Time-boxed forcing of one host into a given health shape.
/// Active while `end_hours_ago <= hours before dataset end < start_hours_ago`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioWindow {
    pub hostname: String,
    pub start_hours_ago: f64,
    pub end_hours_ago: f64,
    #[serde(default)]
    pub floors: MetricFloors,
    #[serde(default)]
    pub alerts: Vec<AlertTemplate>,
    /// Custom fragment substituted for `{detail}` in the alert templates.
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub stop_services: Vec<String>,
}

impl ScenarioWindow {
    pub fn is_active(&self, hours_before_end: f64) -> bool {
        hours_before_end >= self.end_hours_ago && hours_before_end < self.start_hours_ago
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidScenario {
            hostname: self.hostname.clone(),
            reason: reason.to_string(),
        };
        if self.hostname.trim().is_empty() {
            return Err(invalid("empty hostname"));
        }
        if self.end_hours_ago < 0.0 {
            return Err(invalid("end_hours_ago must not be negative"));
        }
        if self.start_hours_ago <= self.end_hours_ago {
            return Err(invalid("start_hours_ago must be greater than end_hours_ago"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSet {
    pub windows: Vec<ScenarioWindow>,
}

impl ScenarioSet {
    pub fn new(windows: Vec<ScenarioWindow>) -> Result<Self, EngineError> {
        let set = Self { windows };
        set.validate()?;
        Ok(set)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, EngineError> {
        let set: ScenarioSet = serde_yaml::from_str(yaml)?;
        set.validate()?;
        Ok(set)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let txt = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&txt)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.windows.iter().try_for_each(ScenarioWindow::validate)
    }

    /// Incident lifecycles used by the demo dashboard (onset, escalation,
    /// resolution) on the reference 50-server fleet.
    pub fn demo() -> Self {
        use AlertSeverity::{Critical, Error, Warning};
        let t = AlertTemplate::new;
        let window = |host: &str, start: f64, end: f64, floors: MetricFloors, alerts: Vec<AlertTemplate>| ScenarioWindow {
            hostname: host.to_string(),
            start_hours_ago: start,
            end_hours_ago: end,
            floors,
            alerts,
            detail: None,
            stop_services: Vec::new(),
        };
        let disk = |v| MetricFloors { disk: Some(v), ..Default::default() };
        let cpu = |v| MetricFloors { cpu: Some(v), ..Default::default() };
        let memory = |v| MetricFloors { memory: Some(v), ..Default::default() };

        let mut cache_outage = window(
            "cache-02",
            14.0,
            12.0,
            memory(93.0),
            vec![
                t("memory", Critical, "Memory exhausted, {value}% used on {hostname}"),
                t("service", Error, "Eviction storm, service restarted{detail}"),
            ],
        );
        cache_outage.detail = Some(" (redis)".to_string());
        cache_outage.stop_services = vec!["redis".to_string()];

        let mut worker_saturation = window(
            "k8s-worker-04",
            9.0,
            7.0,
            MetricFloors { cpu: Some(91.0), memory: Some(85.0), disk: None },
            vec![t("cpu", Critical, "Node CPU saturated at {value}% on {hostname}")],
        );
        worker_saturation.stop_services = vec!["kubelet".to_string()];

        Self {
            windows: vec![
                // db-01: disk fills up, goes critical, cleanup brings it back
                window("db-01", 10.0, 6.0, disk(78.0), vec![t("disk", Warning, "Disk usage high at {value}% on {hostname}")]),
                window("db-01", 6.0, 3.0, disk(92.0), vec![
                    t("disk", Critical, "Disk almost full, {value}% used on {hostname}"),
                    t("application", Error, "Write latency degraded on {role} node"),
                ]),
                window("db-01", 3.0, 2.0, disk(74.0), vec![t("disk", Warning, "Cleanup running, disk at {value}% on {hostname}")]),
                // web-03: afternoon CPU spike
                window("web-03", 4.0, 1.0, cpu(94.0), vec![t("cpu", Critical, "CPU usage critical at {value}% on {hostname}")]),
                // cache-02: memory pressure then eviction storm
                window("cache-02", 18.0, 14.0, memory(86.0), vec![t("memory", Warning, "Memory pressure at {value}% on {hostname}")]),
                cache_outage,
                worker_saturation,
                window("api-02", 22.0, 20.0, memory(75.0), vec![t("memory", Warning, "Memory pressure at {value}% on {hostname}")]),
            ],
        }
    }

    fn for_host(&self, hostname: &str) -> impl Iterator<Item = &ScenarioWindow> {
        let hostname = hostname.to_string();
        self.windows.iter().filter(move |w| w.hostname == hostname)
    }
}

/// One timeline point: every server at `timestamp`
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayFrame {
    pub timestamp: OffsetDateTime,
    pub servers: Vec<ServerState>,
}

#[derive(Debug, Clone)]
pub struct ScenarioOverlay {
    catalog: ProfileCatalog,
    fleet_size: usize,
    scenarios: ScenarioSet,
    steps: usize,
    step: Duration,
}

impl ScenarioOverlay {
    pub fn new(catalog: ProfileCatalog, fleet_size: usize, scenarios: ScenarioSet) -> Result<Self, EngineError> {
        scenarios.validate()?;
        Ok(Self {
            catalog,
            fleet_size,
            scenarios,
            steps: HISTORY_CAPACITY,
            step: Duration::minutes(HISTORY_RESOLUTION_MINUTES),
        })
    }

    pub fn scenarios(&self) -> &ScenarioSet {
        &self.scenarios
    }

    /// Timeline timestamps, oldest first, the last one being `end`.
    pub fn timeline(&self, end: OffsetDateTime) -> Vec<OffsetDateTime> {
        (0..self.steps)
            .map(|i| end - self.step * ((self.steps - 1 - i) as i32))
            .collect()
    }

    pub fn generate<R: Rng + ?Sized>(&self, end: OffsetDateTime, rng: &mut R) -> Vec<OverlayFrame> {
        let mut template: Vec<ServerState> = Vec::with_capacity(self.fleet_size);
        let mut per_role: HashMap<ServerRole, usize> = HashMap::new();
        for index in 0..self.fleet_size {
            let profile = self.catalog.assign(index);
            let ordinal = per_role.entry(profile.role).or_insert(0);
            *ordinal += 1;
            let (state, _) = spawn_server(index, *ordinal, profile, end, rng);
            template.push(state);
        }

        for window in &self.scenarios.windows {
            if !template.iter().any(|s| s.hostname == window.hostname) {
                warn!(hostname = %window.hostname, "scenario window targets a host outside the dataset, ignored");
            }
        }

        let mut counters: Vec<(u64, u64)> = vec![(0, 0); template.len()];
        let frames: Vec<OverlayFrame> = self
            .timeline(end)
            .into_iter()
            .map(|timestamp| {
                let hours_before_end = (end - timestamp).as_seconds_f64() / 3600.0;
                let multiplier = load_multiplier(u32::from(timestamp.hour()));
                let servers = template
                    .iter()
                    .zip(counters.iter_mut())
                    .enumerate()
                    .map(|(index, (base, counter))| {
                        let profile = self.catalog.assign(index);
                        let mut state = base.clone();
                        state.set_metrics(profile.baselines().map(|b| b.draw(&mut *rng)));
                        state.process_count = base.process_count + rng.gen_range(0..=10);
                        state.last_updated = timestamp;

                        let scale = 4_000_000.0 * (0.2 + multiplier) * state.role.traffic_multiplier();
                        counter.0 += (scale * rng.gen_range(0.5..1.5)) as u64;
                        counter.1 += (scale * rng.gen_range(0.3..1.1)) as u64;
                        state.network.rx_bytes = counter.0;
                        state.network.tx_bytes = counter.1;

                        self.apply_windows(&mut state, hours_before_end, rng);
                        state
                    })
                    .collect();
                OverlayFrame { timestamp, servers }
            })
            .collect();

        debug!(frames = frames.len(), servers = self.fleet_size, "overlay dataset generated");
        frames
    }

    fn apply_windows<R: Rng + ?Sized>(&self, state: &mut ServerState, hours_before_end: f64, rng: &mut R) {
        let mut alerts: Vec<Alert> = Vec::new();
        for window in self.scenarios.for_host(&state.hostname) {
            if !window.is_active(hours_before_end) {
                continue;
            }
            let mut metrics = state.metrics();
            for (value, floor) in metrics.iter_mut().zip(window.floors.as_array()) {
                if let Some(floor) = floor {
                    let forced = floor + rng.gen_range(0.0..FLOOR_JITTER);
                    *value = clamp_metric(value.max(forced));
                }
            }
            state.set_metrics(metrics);

            for service in &window.stop_services {
                state.services.insert(service.clone(), ServiceStatus::Stopped);
            }
            if !window.alerts.is_empty() {
                state.network.rx_errors += rng.gen_range(0..=3);
            }
            for template in &window.alerts {
                alerts.push(template.instantiate(state, window.detail.as_deref(), state.last_updated));
            }
        }
        state.alerts = dedup_alerts(alerts);
        state.refresh_status();
    }
}

/// Usage stats of one dataset record (dashboard wire shape)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    /// Megabits per second over the preceding interval.
    pub network_traffic_in: f64,
    pub network_traffic_out: f64,
    pub process_count: u32,
}

/// One element of a generated dataset array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRecord {
    pub hostname: String,
    pub ip: String,
    pub role: ServerRole,
    pub location: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub stats: DatasetStats,
    pub status: HealthStatus,
    pub alerts: Vec<Alert>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Flatten frames into the dashboard dataset, timestamp-major.
pub fn to_dataset(frames: &[OverlayFrame]) -> Vec<DatasetRecord> {
    let interval_secs = (HISTORY_RESOLUTION_MINUTES * 60) as f64;
    let mut previous: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    let mut records = Vec::with_capacity(frames.iter().map(|f| f.servers.len()).sum());

    for frame in frames {
        for state in &frame.servers {
            let (prev_rx, prev_tx) = previous.get(state.hostname.as_str()).copied().unwrap_or((0, 0));
            let mbps = |now: u64, before: u64| round2(now.saturating_sub(before) as f64 * 8.0 / 1_000_000.0 / interval_secs);
            records.push(DatasetRecord {
                hostname: state.hostname.clone(),
                ip: state.ip.clone(),
                role: state.role,
                location: state.region.clone(),
                timestamp: frame.timestamp,
                stats: DatasetStats {
                    cpu_usage: round2(state.cpu_usage),
                    memory_usage: round2(state.memory_usage_percent),
                    disk_usage: round2(state.disk_usage_percent),
                    network_traffic_in: mbps(state.network.rx_bytes, prev_rx),
                    network_traffic_out: mbps(state.network.tx_bytes, prev_tx),
                    process_count: state.process_count,
                },
                status: state.status,
                alerts: state.alerts.clone(),
            });
            previous.insert(state.hostname.as_str(), (state.network.rx_bytes, state.network.tx_bytes));
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::classify::classify_state;
    use crate::profiles::default_catalog;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use time::macros::datetime;

    fn disk_window(host: &str, start: f64, end: f64, floor: f64) -> ScenarioWindow {
        ScenarioWindow {
            hostname: host.to_string(),
            start_hours_ago: start,
            end_hours_ago: end,
            floors: MetricFloors { disk: Some(floor), ..Default::default() },
            alerts: vec![AlertTemplate::new("disk", AlertSeverity::Critical, "Disk at {value}% on {hostname}")],
            detail: None,
            stop_services: Vec::new(),
        }
    }

    #[test]
    fn timeline_has_144_points_ending_at_end() {
        let overlay = ScenarioOverlay::new(default_catalog(), 5, ScenarioSet::default()).unwrap();
        let end = datetime!(2024-05-02 00:00 UTC);
        let timeline = overlay.timeline(end);
        assert_eq!(timeline.len(), 144);
        assert_eq!(timeline[143], end);
        assert_eq!(timeline[0], end - Duration::minutes(1430));
    }

    #[test]
    fn step_boundary_floors_to_ten_minutes() {
        assert_eq!(step_boundary(datetime!(2024-05-01 13:47:12.5 UTC)), datetime!(2024-05-01 13:40 UTC));
        assert_eq!(step_boundary(datetime!(2024-05-01 13:40 UTC)), datetime!(2024-05-01 13:40 UTC));
    }

    #[test]
    fn window_bounds_are_half_open() {
        let w = disk_window("db-01", 6.0, 3.0, 92.0);
        assert!(w.is_active(3.0));
        assert!(w.is_active(5.99));
        assert!(!w.is_active(6.0));
        assert!(!w.is_active(2.99));
    }

    #[test]
    fn forced_disk_floor_is_critical_for_the_whole_window() {
        let scenarios = ScenarioSet::new(vec![disk_window("db-01", 6.0, 3.0, 92.0)]).unwrap();
        let overlay = ScenarioOverlay::new(default_catalog(), 50, scenarios).unwrap();
        let end = datetime!(2024-05-02 00:00 UTC);
        let frames = overlay.generate(end, &mut StdRng::seed_from_u64(99));

        let mut inside = 0;
        for frame in &frames {
            let hours = (end - frame.timestamp).as_seconds_f64() / 3600.0;
            let db = frame.servers.iter().find(|s| s.hostname == "db-01").unwrap();
            if (3.0..6.0).contains(&hours) {
                inside += 1;
                assert!(db.disk_usage_percent >= 92.0);
                assert_eq!(db.status, HealthStatus::Critical);
                assert_eq!(db.alerts.len(), 1);
                assert!(db.alerts[0].message.starts_with("Disk at 9"));
            } else {
                assert!(db.alerts.is_empty());
            }
            for server in &frame.servers {
                assert_eq!(server.status, classify_state(server));
            }
        }
        assert_eq!(inside, 18);
    }

    #[test]
    fn overlapping_windows_dedup_their_alerts() {
        let scenarios = ScenarioSet::new(vec![
            disk_window("db-01", 6.0, 0.0, 92.0),
            disk_window("db-01", 4.0, 0.0, 95.0),
        ])
        .unwrap();
        let overlay = ScenarioOverlay::new(default_catalog(), 50, scenarios).unwrap();
        let end = datetime!(2024-05-02 00:00 UTC);
        let frames = overlay.generate(end, &mut StdRng::seed_from_u64(4));
        let last = frames.last().unwrap();
        let db = last.servers.iter().find(|s| s.hostname == "db-01").unwrap();
        assert_eq!(db.alerts.len(), 1);
        assert!(db.disk_usage_percent >= 95.0);
    }

    #[test]
    fn invalid_windows_are_rejected() {
        let reversed = disk_window("db-01", 3.0, 6.0, 92.0);
        assert!(matches!(
            ScenarioSet::new(vec![reversed]),
            Err(EngineError::InvalidScenario { .. })
        ));
        assert!(ScenarioSet::demo().validate().is_ok());
    }

    #[test]
    fn dataset_records_use_the_dashboard_shape() {
        let overlay = ScenarioOverlay::new(default_catalog(), 50, ScenarioSet::demo()).unwrap();
        let end = datetime!(2024-05-02 00:00 UTC);
        let frames = overlay.generate(end, &mut StdRng::seed_from_u64(1));
        let dataset = to_dataset(&frames);
        assert_eq!(dataset.len(), 144 * 50);

        let json = serde_json::to_value(&dataset[0]).unwrap();
        for key in ["hostname", "ip", "role", "location", "timestamp", "stats", "status", "alerts"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        for key in ["cpuUsage", "memoryUsage", "diskUsage", "networkTrafficIn", "networkTrafficOut", "processCount"] {
            assert!(json["stats"].get(key).is_some(), "missing stats.{key}");
        }
        assert!(dataset.iter().all(|r| r.stats.network_traffic_in >= 0.0));

        let cache_critical = dataset
            .iter()
            .filter(|r| r.hostname == "cache-02" && r.status == HealthStatus::Critical)
            .count();
        assert!(cache_critical >= 12);
    }

    #[test]
    fn scenarios_load_from_yaml() {
        let yaml = r#"
windows:
  - hostname: web-03
    start_hours_ago: 4
    end_hours_ago: 1
    floors: { cpu: 94 }
    alerts:
      - type: cpu
        severity: critical
        text: "CPU at {value}%"
"#;
        let set = ScenarioSet::from_yaml_str(yaml).unwrap();
        assert_eq!(set.windows.len(), 1);
        assert_eq!(set.windows[0].floors.cpu, Some(94.0));
        assert!(set.windows[0].stop_services.is_empty());
    }

    #[test]
    fn scenario_file_loads_and_bad_paths_fail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let yaml = serde_yaml::to_string(&ScenarioSet::demo()).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let loaded = ScenarioSet::load(file.path()).unwrap();
        assert_eq!(loaded, ScenarioSet::demo());

        let missing = file.path().with_extension("missing");
        assert!(matches!(ScenarioSet::load(missing), Err(EngineError::Io(_))));
    }

    #[test]
    fn scenario_file_with_inverted_window_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "windows:\n  - hostname: web-01\n    start_hours_ago: 2\n    end_hours_ago: 5").unwrap();
        assert!(matches!(
            ScenarioSet::load(file.path()),
            Err(EngineError::InvalidScenario { .. })
        ));
    }
}
