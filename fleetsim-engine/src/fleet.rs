//! Fleet-state owner.
//!
//! `Fleet` is the single writer of server state. Consumers get snapshots by
//! reference or subscribe to `FleetEvent`s; every broadcast snapshot is a
//! fully-formed copy taken after the tick completed.

use crate::error::EngineError;
use crate::history::HistoryStore;
use crate::models::{ServerRole, ServerState};
use crate::overlay::{step_boundary, OverlayFrame};
use crate::profiles::{default_catalog, spawn_server, ProfileCatalog};
use crate::tick::{ControlTargets, SimulatedServer, StatusCounts, TickEngine, TickSummary};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub size: usize,
    /// Fixed seed for reproducible runs; entropy when absent.
    pub seed: Option<u64>,
    pub target_critical_ratio: f64,
    pub target_warning_ratio: f64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let targets = ControlTargets::default();
        Self {
            size: 50,
            seed: None,
            target_critical_ratio: targets.critical_ratio,
            target_warning_ratio: targets.warning_ratio,
        }
    }
}

impl FleetConfig {
    pub fn targets(&self) -> ControlTargets {
        ControlTargets {
            critical_ratio: self.target_critical_ratio,
            warning_ratio: self.target_warning_ratio,
        }
    }
}

/// Notification delivered to fleet subscribers
#[derive(Debug, Clone)]
pub enum FleetEvent {
    Ticked {
        summary: TickSummary,
        snapshot: Arc<Vec<ServerState>>,
    },
    Grown {
        added: usize,
        size: usize,
    },
}

pub struct Fleet {
    catalog: ProfileCatalog,
    engine: TickEngine,
    servers: Vec<SimulatedServer>,
    history: HistoryStore,
    /// Step boundary of the newest history entry.
    recorded_step: Option<OffsetDateTime>,
    rng: StdRng,
    ticks: u64,
    events: broadcast::Sender<FleetEvent>,
}

impl Fleet {
    pub fn new(config: FleetConfig, now: OffsetDateTime) -> Self {
        Self::with_catalog(config, default_catalog(), now)
    }

    pub fn with_catalog(config: FleetConfig, catalog: ProfileCatalog, now: OffsetDateTime) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut fleet = Self {
            catalog,
            engine: TickEngine::new(config.targets()),
            servers: Vec::with_capacity(config.size),
            history: HistoryStore::new(),
            recorded_step: None,
            rng,
            ticks: 0,
            events,
        };
        fleet.grow(config.size, now);
        info!(size = fleet.len(), "fleet instantiated");
        fleet
    }

    /// Add `count` servers, assigned to profiles by fleet index.
    pub fn grow(&mut self, count: usize, now: OffsetDateTime) -> usize {
        for _ in 0..count {
            let index = self.servers.len();
            let profile = self.catalog.assign(index);
            let ordinal = self.role_count(profile.role) + 1;
            let (state, baseline) = spawn_server(index, ordinal, profile, now, &mut self.rng);
            debug!(hostname = %state.hostname, role = %state.role, "server created");
            self.servers.push(SimulatedServer { state, baseline });
        }
        if count > 0 {
            let _ = self.events.send(FleetEvent::Grown {
                added: count,
                size: self.servers.len(),
            });
        }
        self.servers.len()
    }

    fn role_count(&self, role: ServerRole) -> usize {
        self.servers.iter().filter(|s| s.state.role == role).count()
    }

    /// Run one tick over the whole fleet and notify subscribers. History
    /// takes at most one entry per 10-minute step, whatever the tick rate.
    pub fn tick(&mut self, now: OffsetDateTime) -> TickSummary {
        self.ticks += 1;
        let summary = self.engine.advance(&mut self.servers, self.ticks, now, &mut self.rng);
        let step = step_boundary(now);
        if self.recorded_step.map_or(true, |last| step > last) {
            for server in &self.servers {
                self.history.record(&server.state);
            }
            self.recorded_step = Some(step);
        }

        let event = FleetEvent::Ticked {
            summary: summary.clone(),
            snapshot: Arc::new(self.snapshot()),
        };
        if self.events.send(event).is_err() {
            trace!(tick = summary.tick, "no fleet subscribers");
        }
        debug!(
            tick = summary.tick,
            critical = summary.counts.critical,
            warning = summary.counts.warning,
            transitions = summary.transitions,
            "tick complete"
        );
        summary
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn targets(&self) -> ControlTargets {
        self.engine.targets()
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerState> {
        self.servers.iter().map(|s| &s.state)
    }

    /// Owned copy of every current server state, in fleet order.
    pub fn snapshot(&self) -> Vec<ServerState> {
        self.servers().cloned().collect()
    }

    pub fn server(&self, hostname: &str) -> Result<&ServerState, EngineError> {
        self.servers()
            .find(|s| s.hostname == hostname)
            .ok_or_else(|| EngineError::UnknownHost(hostname.to_string()))
    }

    /// History of a fleet host; empty until its first tick.
    pub fn history(&self, hostname: &str) -> Result<Vec<ServerState>, EngineError> {
        self.server(hostname)?;
        Ok(self
            .history
            .series(hostname)
            .map(|series| series.to_vec())
            .unwrap_or_default())
    }

    pub fn all_history(&self) -> BTreeMap<String, Vec<ServerState>> {
        self.history
            .all()
            .iter()
            .map(|(host, series)| (host.clone(), series.to_vec()))
            .collect()
    }

    /// Pre-fill history from overlay frames (oldest first). Entries for
    /// hosts outside the fleet are ignored.
    pub fn seed_history(&mut self, frames: &[OverlayFrame]) -> usize {
        let mut seeded = 0;
        for frame in frames {
            for state in &frame.servers {
                if self.server(&state.hostname).is_ok() {
                    self.history.record(state);
                    seeded += 1;
                }
            }
        }
        if let Some(last) = frames.last() {
            let step = step_boundary(last.timestamp);
            self.recorded_step = self.recorded_step.max(Some(step));
        }
        info!(entries = seeded, frames = frames.len(), "history seeded from overlay");
        seeded
    }

    pub fn status_counts(&self) -> StatusCounts {
        StatusCounts::from_statuses(self.servers().map(|s| s.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HISTORY_CAPACITY;
    use crate::overlay::{ScenarioOverlay, ScenarioSet};
    use time::macros::datetime;
    use time::Duration;

    fn seeded(size: usize) -> Fleet {
        let config = FleetConfig {
            size,
            seed: Some(17),
            ..Default::default()
        };
        Fleet::new(config, datetime!(2024-05-01 00:00 UTC))
    }

    #[test]
    fn history_caps_at_144_and_keeps_most_recent() {
        let mut fleet = seeded(3);
        let start = datetime!(2024-05-01 00:00 UTC);
        for i in 1..=145 {
            fleet.tick(start + Duration::minutes(10 * i));
        }

        let history = fleet.history("web-01").unwrap();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].last_updated, start + Duration::minutes(20));
        assert_eq!(history[143].last_updated, start + Duration::minutes(1450));
        assert!(history.windows(2).all(|w| w[0].last_updated < w[1].last_updated));
    }

    #[test]
    fn fast_ticks_keep_ten_minute_history() {
        let mut fleet = seeded(50);
        let end = datetime!(2024-05-01 06:00 UTC);
        let overlay = ScenarioOverlay::new(default_catalog(), 50, ScenarioSet::demo()).unwrap();
        fleet.seed_history(&overlay.generate(end, &mut StdRng::seed_from_u64(3)));

        for i in 1..=144 {
            fleet.tick(end + Duration::seconds(10 * i));
        }

        let history = fleet.history("db-01").unwrap();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        let span = history[143].last_updated - history[0].last_updated;
        assert!(span >= Duration::minutes(1430), "history spans only {span}");
        assert_eq!(history[143].last_updated, end + Duration::minutes(20));
    }

    #[test]
    fn ticks_within_one_step_record_once() {
        let mut fleet = seeded(3);
        let start = datetime!(2024-05-01 00:00 UTC);
        for i in 0..60 {
            fleet.tick(start + Duration::seconds(10 * i));
        }
        assert_eq!(fleet.history("web-01").unwrap().len(), 1);
        fleet.tick(start + Duration::minutes(10));
        assert_eq!(fleet.history("web-01").unwrap().len(), 2);
    }

    #[test]
    fn unknown_hosts_are_reported() {
        let fleet = seeded(3);
        assert!(matches!(fleet.history("nope-01"), Err(EngineError::UnknownHost(_))));
        assert!(fleet.history("web-02").unwrap().is_empty());
    }

    #[test]
    fn growth_past_catalog_falls_back_to_first_role() {
        let mut fleet = seeded(50);
        fleet.grow(2, datetime!(2024-05-01 00:00 UTC));
        assert_eq!(fleet.len(), 52);
        assert!(fleet.server("web-11").is_ok());
        assert!(fleet.server("web-12").is_ok());
        assert!(fleet.server("k8s-etcd-03").is_ok());
    }

    #[test]
    fn same_seed_same_fleet() {
        let mut a = seeded(20);
        let mut b = seeded(20);
        let now = datetime!(2024-05-01 13:00 UTC);
        for _ in 0..10 {
            a.tick(now);
            b.tick(now);
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[tokio::test]
    async fn subscribers_receive_complete_snapshots() {
        let mut fleet = seeded(10);
        let mut rx = fleet.subscribe();
        let summary = fleet.tick(datetime!(2024-05-01 09:00 UTC));

        match rx.recv().await.unwrap() {
            FleetEvent::Ticked { summary: got, snapshot } => {
                assert_eq!(got, summary);
                assert_eq!(snapshot.len(), 10);
                assert_eq!(*snapshot, fleet.snapshot());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
