/*!
Test harness for engine scenarios

- Seeded fleet advanced on a fake clock (10 minutes per tick)
- Incident detector wired to a `StubNarrativeProvider`
- JSON field helpers for wire-shape assertions
*/

use crate::narrative_stub::StubNarrativeProvider;
use anyhow::Result;
use fleetsim_engine::tick::TickSummary;
use fleetsim_engine::{
    Fleet, FleetConfig, FleetEvent, Incident, IncidentDetector, IncidentPolicy, ServerState,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tokio::sync::broadcast;

pub const TICK_STEP_MINUTES: i64 = 10;

pub struct TestHarness {
    pub fleet: Fleet,
    pub detector: IncidentDetector,
    pub narrative: StubNarrativeProvider,
    clock: OffsetDateTime,
}

impl TestHarness {
    /// Seeded fleet of `size` servers starting at a fixed instant.
    pub fn new(size: usize, seed: u64) -> Self {
        Self::with_policy(size, seed, IncidentPolicy::default())
    }

    pub fn with_policy(size: usize, seed: u64, policy: IncidentPolicy) -> Self {
        env_logger::try_init().ok();

        let clock = datetime!(2024-05-01 00:00 UTC);
        let config = FleetConfig {
            size,
            seed: Some(seed),
            ..Default::default()
        };
        let narrative = StubNarrativeProvider::replying("Stub analysis: restart the affected service.");
        let detector = IncidentDetector::new(Arc::new(narrative.clone()), policy);
        Self {
            fleet: Fleet::new(config, clock),
            detector,
            narrative,
            clock,
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock
    }

    pub fn advance_clock(&mut self, by: Duration) {
        self.clock += by;
    }

    /// Advance the fleet `n` ticks on the fake clock.
    pub fn tick(&mut self, n: usize) -> Vec<TickSummary> {
        (0..n)
            .map(|_| {
                self.clock += Duration::minutes(TICK_STEP_MINUTES);
                self.fleet.tick(self.clock)
            })
            .collect()
    }

    /// One detector pass over the current fleet snapshot.
    pub async fn scan(&self) -> Vec<Incident> {
        self.detector.scan(&self.fleet.snapshot(), self.clock).await
    }

    /// Detector pass over a hand-made snapshot.
    pub async fn scan_snapshot(&self, snapshot: &[ServerState]) -> Vec<Incident> {
        self.detector.scan(snapshot, self.clock).await
    }

    /// Tick and scan `n` times, collecting every new incident.
    pub async fn run(&mut self, n: usize) -> Vec<Incident> {
        let mut incidents = Vec::new();
        for _ in 0..n {
            self.tick(1);
            incidents.extend(self.scan().await);
        }
        log::info!("🧪 ran {} ticks, {} incidents", n, incidents.len());
        incidents
    }

    pub fn stats(&self) -> TestStats {
        let counts = self.fleet.status_counts();
        TestStats {
            ticks: self.fleet.tick_count(),
            servers: self.fleet.len(),
            critical: counts.critical,
            warning: counts.warning,
            narrative_calls: self.narrative.call_count(),
        }
    }
}

/// Wait for the next `Ticked` event, skipping other events.
pub async fn wait_for_tick(
    rx: &mut broadcast::Receiver<FleetEvent>,
    timeout_ms: u64,
) -> Result<Option<Arc<Vec<ServerState>>>> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(FleetEvent::Ticked { snapshot, .. }) => return Some(snapshot),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("⏰ receiver lagged, {} events skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    match tokio::time::timeout(StdDuration::from_millis(timeout_ms), wait).await {
        Ok(snapshot) => Ok(snapshot),
        Err(_) => {
            log::warn!("⏰ timeout waiting for a tick event");
            Ok(None)
        }
    }
}

/// Dotted-path lookup in a JSON value (`stats.cpuUsage`).
pub fn nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

pub fn assert_field_exists(value: &Value, path: &str) -> Result<()> {
    if nested_field(value, path).is_none() {
        anyhow::bail!("Field '{}' not found", path);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestStats {
    pub ticks: u64,
    pub servers: usize,
    pub critical: usize,
    pub warning: usize,
    pub narrative_calls: usize,
}

impl TestStats {
    pub fn print(&self) {
        println!("📊 Harness statistics:");
        println!("  Ticks: {}", self.ticks);
        println!("  Servers: {} ({} critical, {} warning)", self.servers, self.critical, self.warning);
        println!("  Narrative calls: {}", self.narrative_calls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_ticks_on_fake_clock() {
        let mut harness = TestHarness::new(20, 11);
        let start = harness.now();
        let summaries = harness.tick(3);
        assert_eq!(summaries.len(), 3);
        assert_eq!(harness.now() - start, Duration::minutes(30));
        assert_eq!(harness.stats().ticks, 3);
        harness.stats().print();
    }

    #[tokio::test]
    async fn subscriber_sees_tick() {
        let mut harness = TestHarness::new(5, 3);
        let mut rx = harness.fleet.subscribe();
        harness.tick(1);
        let snapshot = wait_for_tick(&mut rx, 500).await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 5);
    }

    #[test]
    fn nested_lookup() {
        let v = serde_json::json!({"stats": {"cpuUsage": 12.5}});
        assert_eq!(nested_field(&v, "stats.cpuUsage"), Some(&serde_json::json!(12.5)));
        assert!(assert_field_exists(&v, "stats.diskUsage").is_err());
    }
}
