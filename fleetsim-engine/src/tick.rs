//! Tick evolution engine.
//!
//! Advances every server one step: transition decision (hysteresis plus
//! severity-ratio control), metric resampling around the per-server
//! baseline, then the auxiliary fields (network, services, zombies, alerts).
//! Status is always recomputed with `classify` after the metric update.

use crate::alerts::{push_unique, AlertSynthesizer};
use crate::classify::{clamp_metric, CRITICAL_THRESHOLD, METRIC_CEILING, WARNING_THRESHOLD};
use crate::load::{load_multiplier, time_of_day_influence, INFLUENCE_FACTORS};
use crate::models::{AlertSeverity, HealthStatus, ServerState, ServiceStatus};
use crate::profiles::ServerBaseline;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const CRITICAL_EXIT_PROBABILITY: f64 = 0.2;
pub const WARNING_CHANGE_PROBABILITY: f64 = 0.3;
pub const WARNING_TO_NORMAL_SHARE: f64 = 0.7;
pub const PROMOTE_CRITICAL_PROBABILITY: f64 = 0.05;
pub const PROMOTE_WARNING_PROBABILITY: f64 = 0.10;

pub const SERVICE_EVALUATION_PROBABILITY: f64 = 0.3;
pub const SERVICE_RESTART_PROBABILITY: f64 = 0.7;
pub const SERVICE_STOP_PROBABILITY: f64 = 0.2;
pub const ALERT_RESOLUTION_PROBABILITY: f64 = 0.7;

/// Highest value a metric may hold while the server is held Normal.
const NORMAL_BAND_CEILING: f64 = 69.0;
/// Highest value a metric may hold while the server is held Warning.
const WARNING_BAND_CEILING: f64 = 89.0;
const BYTES_PER_TICK: f64 = 4_000_000.0;

/// Target fractions of the fleet in Critical and Warning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlTargets {
    pub critical_ratio: f64,
    pub warning_ratio: f64,
}

impl Default for ControlTargets {
    fn default() -> Self {
        Self {
            critical_ratio: 0.03,
            warning_ratio: 0.06,
        }
    }
}

impl ControlTargets {
    /// `(floor(size * critical_ratio), floor(size * warning_ratio))`
    pub fn for_fleet(&self, fleet_size: usize) -> (usize, usize) {
        let size = fleet_size as f64;
        (
            (size * self.critical_ratio).floor().max(0.0) as usize,
            (size * self.warning_ratio).floor().max(0.0) as usize,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
}

impl StatusCounts {
    pub fn from_statuses<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.add(status);
        }
        counts
    }

    pub fn add(&mut self, status: HealthStatus) {
        *self.slot(status) += 1;
    }

    pub fn remove(&mut self, status: HealthStatus) {
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }

    pub fn get(&self, status: HealthStatus) -> usize {
        match status {
            HealthStatus::Normal => self.normal,
            HealthStatus::Warning => self.warning,
            HealthStatus::Critical => self.critical,
        }
    }

    pub fn total(&self) -> usize {
        self.normal + self.warning + self.critical
    }

    fn slot(&mut self, status: HealthStatus) -> &mut usize {
        match status {
            HealthStatus::Normal => &mut self.normal,
            HealthStatus::Warning => &mut self.warning,
            HealthStatus::Critical => &mut self.critical,
        }
    }
}

/// Outcome of one tick, broadcast to fleet subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub load_multiplier: f64,
    pub counts: StatusCounts,
    pub transitions: usize,
}

/// A live server: its snapshot plus the baseline drawn at creation
#[derive(Debug, Clone)]
pub struct SimulatedServer {
    pub state: ServerState,
    pub baseline: ServerBaseline,
}

#[derive(Debug, Clone, Default)]
pub struct TickEngine {
    targets: ControlTargets,
    synthesizer: AlertSynthesizer,
}

impl TickEngine {
    pub fn new(targets: ControlTargets) -> Self {
        Self {
            targets,
            synthesizer: AlertSynthesizer::default(),
        }
    }

    pub fn targets(&self) -> ControlTargets {
        self.targets
    }

    /// Transition decision for one server against the running counts of the
    /// current tick.
    pub fn decide<R: Rng + ?Sized>(
        &self,
        current: HealthStatus,
        running: &StatusCounts,
        targets: (usize, usize),
        rng: &mut R,
    ) -> HealthStatus {
        let (target_critical, target_warning) = targets;
        match current {
            HealthStatus::Critical => {
                if rng.gen_bool(CRITICAL_EXIT_PROBABILITY) {
                    if rng.gen_bool(0.5) {
                        HealthStatus::Normal
                    } else {
                        HealthStatus::Warning
                    }
                } else {
                    HealthStatus::Critical
                }
            }
            HealthStatus::Warning => {
                if rng.gen_bool(WARNING_CHANGE_PROBABILITY) {
                    if rng.gen_bool(WARNING_TO_NORMAL_SHARE) {
                        HealthStatus::Normal
                    } else {
                        HealthStatus::Critical
                    }
                } else {
                    HealthStatus::Warning
                }
            }
            HealthStatus::Normal => {
                // Critical and Warning promotions do not share a budget.
                if running.critical < target_critical && rng.gen_bool(PROMOTE_CRITICAL_PROBABILITY) {
                    HealthStatus::Critical
                } else if running.warning < target_warning && rng.gen_bool(PROMOTE_WARNING_PROBABILITY) {
                    HealthStatus::Warning
                } else {
                    HealthStatus::Normal
                }
            }
        }
    }

    /// Advance every server by one tick, in order.
    pub fn advance<R: Rng + ?Sized>(
        &self,
        servers: &mut [SimulatedServer],
        tick: u64,
        now: OffsetDateTime,
        rng: &mut R,
    ) -> TickSummary {
        let targets = self.targets.for_fleet(servers.len());
        let multiplier = load_multiplier(u32::from(now.hour()));
        let mut running = StatusCounts::from_statuses(servers.iter().map(|s| s.state.status));
        let mut transitions = 0;

        for server in servers.iter_mut() {
            let previous = server.state.status;
            let decided = self.decide(previous, &running, targets, rng);

            evolve_metrics(server, previous, decided, multiplier, rng);
            server.state.refresh_status();
            self.roll_alerts(&mut server.state, now, rng);
            drift_network(&mut server.state, multiplier, rng);
            churn_services(&mut server.state, rng);
            drift_processes(&mut server.state, rng);
            server.state.last_updated = now;

            let updated = server.state.status;
            if updated != previous {
                running.remove(previous);
                running.add(updated);
                transitions += 1;
            }
        }

        TickSummary {
            tick,
            timestamp: now,
            load_multiplier: multiplier,
            counts: running,
            transitions,
        }
    }

    /// Resolve existing alerts (70% each) and maybe append 1-2 new ones.
    fn roll_alerts<R: Rng + ?Sized>(&self, state: &mut ServerState, now: OffsetDateTime, rng: &mut R) {
        state.alerts.retain(|_| !rng.gen_bool(ALERT_RESOLUTION_PROBABILITY));

        let new_alert_probability = match state.status {
            HealthStatus::Critical => 0.5,
            HealthStatus::Warning => 0.25,
            HealthStatus::Normal => 0.05,
        };
        if !rng.gen_bool(new_alert_probability) {
            return;
        }

        let detail = state.stopped_services().next().map(|name| format!(" ({name})"));
        for _ in 0..rng.gen_range(1..=2) {
            let severity = match state.status {
                HealthStatus::Critical if rng.gen_bool(0.5) => AlertSeverity::Critical,
                HealthStatus::Critical => AlertSeverity::Error,
                HealthStatus::Warning if rng.gen_bool(0.7) => AlertSeverity::Warning,
                HealthStatus::Warning => AlertSeverity::Error,
                HealthStatus::Normal => AlertSeverity::Warning,
            };
            if let Some(alert) = self.synthesizer.synthesize(severity, state, detail.as_deref(), now, rng) {
                push_unique(&mut state.alerts, alert);
            }
        }
    }
}

/// Resample the three usage metrics and enforce the decided severity band.
fn evolve_metrics<R: Rng + ?Sized>(
    server: &mut SimulatedServer,
    previous: HealthStatus,
    decided: HealthStatus,
    multiplier: f64,
    rng: &mut R,
) {
    let current = server.state.metrics();
    let baseline = server.baseline;
    let mut proposed = [0.0; 3];
    for (i, value) in proposed.iter_mut().enumerate() {
        let level = baseline.levels[i];
        let spread = baseline.variation[i];
        *value = level
            + rng.gen_range(-spread..=spread)
            + time_of_day_influence(level, multiplier, INFLUENCE_FACTORS[i]);
    }

    match decided {
        HealthStatus::Critical => {
            let focus = focus_metric(rng);
            proposed[focus] = proposed[focus].max(rng.gen_range(CRITICAL_THRESHOLD..=METRIC_CEILING));
        }
        HealthStatus::Warning => {
            for value in proposed.iter_mut() {
                *value = value.min(WARNING_BAND_CEILING);
            }
            let focus = focus_metric(rng);
            proposed[focus] = proposed[focus].max(rng.gen_range(WARNING_THRESHOLD..=WARNING_BAND_CEILING));
        }
        HealthStatus::Normal if previous != HealthStatus::Normal => {
            for (value, was) in proposed.iter_mut().zip(current) {
                if was >= WARNING_THRESHOLD {
                    *value = value.min(was - rng.gen_range(10.0..=30.0));
                } else {
                    *value = value.min(NORMAL_BAND_CEILING);
                }
            }
        }
        HealthStatus::Normal => {
            for value in proposed.iter_mut() {
                *value = value.min(NORMAL_BAND_CEILING);
            }
        }
    }

    server.state.set_metrics(proposed.map(clamp_metric));
}

/// Metric carrying the forced floor, drawn uniformly on every tick.
fn focus_metric<R: Rng + ?Sized>(rng: &mut R) -> usize {
    rng.gen_range(0..3)
}

fn drift_network<R: Rng + ?Sized>(state: &mut ServerState, multiplier: f64, rng: &mut R) {
    let scale = BYTES_PER_TICK * (0.2 + multiplier) * state.role.traffic_multiplier();
    let rx = scale * rng.gen_range(0.5..1.5);
    let tx = scale * rng.gen_range(0.3..1.1);
    state.network.rx_bytes = state.network.rx_bytes.saturating_add(rx as u64);
    state.network.tx_bytes = state.network.tx_bytes.saturating_add(tx as u64);

    if state.alerts.is_empty() {
        state.network.rx_errors /= 2;
        state.network.tx_errors /= 2;
    } else {
        if rng.gen_bool(0.4) {
            state.network.rx_errors += rng.gen_range(1..=3);
        }
        if rng.gen_bool(0.2) {
            state.network.tx_errors += rng.gen_range(1..=2);
        }
    }
}

fn churn_services<R: Rng + ?Sized>(state: &mut ServerState, rng: &mut R) {
    if !rng.gen_bool(SERVICE_EVALUATION_PROBABILITY) {
        return;
    }
    for status in state.services.values_mut() {
        *status = match *status {
            ServiceStatus::Stopped if rng.gen_bool(SERVICE_RESTART_PROBABILITY) => ServiceStatus::Running,
            ServiceStatus::Running if rng.gen_bool(SERVICE_STOP_PROBABILITY) => ServiceStatus::Stopped,
            unchanged => unchanged,
        };
    }
}

fn drift_processes<R: Rng + ?Sized>(state: &mut ServerState, rng: &mut R) {
    if state.status == HealthStatus::Critical && rng.gen_bool(0.15) {
        state.zombie_count += 1;
    } else if state.zombie_count > 0 && rng.gen_bool(0.3) {
        state.zombie_count -= 1;
    } else if rng.gen_bool(0.01) {
        state.zombie_count += 1;
    }

    let step: i64 = rng.gen_range(-3..=3);
    state.process_count = (i64::from(state.process_count) + step).max(1) as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_state;
    use crate::profiles::{default_catalog, spawn_server};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use time::macros::datetime;
    use time::Duration;

    fn fleet(size: usize, rng: &mut StdRng) -> Vec<SimulatedServer> {
        let catalog = default_catalog();
        let now = datetime!(2024-05-01 00:00 UTC);
        (0..size)
            .map(|i| {
                let (state, baseline) = spawn_server(i, i + 1, catalog.assign(i), now, rng);
                SimulatedServer { state, baseline }
            })
            .collect()
    }

    #[test]
    fn targets_floor_against_fleet_size() {
        let targets = ControlTargets { critical_ratio: 0.03, warning_ratio: 0.06 };
        assert_eq!(targets.for_fleet(50), (1, 3));
        assert_eq!(targets.for_fleet(10), (0, 0));
        assert_eq!(targets.for_fleet(100), (3, 6));
    }

    #[test]
    fn normal_servers_are_never_promoted_when_targets_are_met() {
        let engine = TickEngine::new(ControlTargets::default());
        let mut rng = StdRng::seed_from_u64(11);
        let running = StatusCounts { normal: 40, warning: 5, critical: 5 };
        for _ in 0..2_000 {
            assert_eq!(engine.decide(HealthStatus::Normal, &running, (1, 3), &mut rng), HealthStatus::Normal);
        }
    }

    #[test]
    fn transition_rates_follow_the_policy() {
        let engine = TickEngine::new(ControlTargets::default());
        let mut rng = StdRng::seed_from_u64(5);
        let running = StatusCounts::default();
        let trials = 20_000;

        let left_critical = (0..trials)
            .filter(|_| engine.decide(HealthStatus::Critical, &running, (0, 0), &mut rng) != HealthStatus::Critical)
            .count() as f64
            / trials as f64;
        assert!((left_critical - 0.2).abs() < 0.02, "critical exit rate {left_critical}");

        let mut to_normal = 0;
        let mut to_critical = 0;
        for _ in 0..trials {
            match engine.decide(HealthStatus::Warning, &running, (0, 0), &mut rng) {
                HealthStatus::Normal => to_normal += 1,
                HealthStatus::Critical => to_critical += 1,
                HealthStatus::Warning => {}
            }
        }
        let changed = (to_normal + to_critical) as f64 / trials as f64;
        assert!((changed - 0.3).abs() < 0.02, "warning change rate {changed}");
        assert!(to_normal > to_critical * 2);

        let promoted = (0..trials)
            .filter(|_| engine.decide(HealthStatus::Normal, &running, (1, 0), &mut rng) == HealthStatus::Critical)
            .count() as f64
            / trials as f64;
        assert!((promoted - 0.05).abs() < 0.01, "critical promotion rate {promoted}");
    }

    #[test]
    fn every_tick_keeps_metrics_bounded_and_status_classified() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut servers = fleet(50, &mut rng);
        let engine = TickEngine::new(ControlTargets::default());
        let start = datetime!(2024-05-01 00:00 UTC);

        for tick in 0..500u64 {
            let now = start + Duration::minutes(10 * tick as i64);
            let summary = engine.advance(&mut servers, tick, now, &mut rng);
            assert_eq!(summary.counts.total(), 50);
            for server in &servers {
                for metric in server.state.metrics() {
                    assert!((5.0..=98.0).contains(&metric), "metric {metric} out of bounds");
                }
                assert_eq!(server.state.status, classify_state(&server.state));
                assert_eq!(server.state.last_updated, now);
            }
            let recount = StatusCounts::from_statuses(servers.iter().map(|s| s.state.status));
            assert_eq!(summary.counts, recount);
        }
    }

    #[test]
    fn alert_lists_never_hold_duplicate_keys() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut servers = fleet(50, &mut rng);
        let engine = TickEngine::new(ControlTargets { critical_ratio: 0.2, warning_ratio: 0.3 });
        let now = datetime!(2024-05-01 14:00 UTC);

        for tick in 0..300 {
            engine.advance(&mut servers, tick, now, &mut rng);
            for server in &servers {
                let mut keys: Vec<_> = server.state.alerts.iter().map(|a| a.dedup_key()).collect();
                let before = keys.len();
                keys.sort();
                keys.dedup();
                assert_eq!(keys.len(), before);
            }
        }
    }

    #[test]
    fn critical_count_hovers_around_target() {
        let mut rng = StdRng::seed_from_u64(2024);
        let mut servers = fleet(50, &mut rng);
        let engine = TickEngine::new(ControlTargets { critical_ratio: 0.03, warning_ratio: 0.06 });
        let start = datetime!(2024-05-01 00:00 UTC);
        let ticks = 10_000u64;
        let mut histogram = [0usize; 51];

        for tick in 0..ticks {
            let now = start + Duration::minutes(10 * tick as i64);
            let summary = engine.advance(&mut servers, tick, now, &mut rng);
            histogram[summary.counts.critical] += 1;
        }

        let near_target = (histogram[1] + histogram[2]) as f64 / ticks as f64;
        let none = histogram[0] as f64 / ticks as f64;
        let above = histogram[3..].iter().sum::<usize>() as f64 / ticks as f64;
        assert!(near_target > 0.6, "critical count in {{1,2}} only {near_target}");
        assert!(near_target > none && near_target > above);
    }

    #[test]
    fn normal_jitter_spans_the_full_variation() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut server = fleet(1, &mut rng).remove(0);
        server.baseline = ServerBaseline { levels: [22.9, 30.0, 40.0], variation: [15.0, 10.0, 5.0] };
        let multiplier = load_multiplier(14);
        let center = 22.9 + time_of_day_influence(22.9, multiplier, INFLUENCE_FACTORS[0]);

        let mut max_dev: f64 = 0.0;
        for _ in 0..5_000 {
            evolve_metrics(&mut server, HealthStatus::Normal, HealthStatus::Normal, multiplier, &mut rng);
            let dev = (server.state.cpu_usage - center).abs();
            assert!(dev <= 15.0 + 1e-9, "cpu deviation {dev} beyond variation");
            max_dev = max_dev.max(dev);
        }
        assert!(max_dev > 7.5 + 3.0, "cpu deviation peaked at {max_dev}");
    }

    #[test]
    fn kept_critical_lifts_a_random_metric() {
        let mut rng = StdRng::seed_from_u64(31);
        let mut server = fleet(1, &mut rng).remove(0);
        server.baseline = ServerBaseline { levels: [20.0, 20.0, 20.0], variation: [5.0, 5.0, 5.0] };
        let multiplier = load_multiplier(3);
        let mut hits = [0usize; 3];

        for _ in 0..600 {
            server.state.set_metrics([95.0, 30.0, 30.0]);
            evolve_metrics(&mut server, HealthStatus::Critical, HealthStatus::Critical, multiplier, &mut rng);
            let metrics = server.state.metrics();
            let lifted: Vec<usize> = (0..3).filter(|&i| metrics[i] >= CRITICAL_THRESHOLD).collect();
            assert_eq!(lifted.len(), 1, "metrics {metrics:?}");
            hits[lifted[0]] += 1;
        }
        assert!(hits.iter().all(|&n| n > 120), "focus counts {hits:?}");
    }
}
