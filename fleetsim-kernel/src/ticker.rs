/**
 * FLEET TICKER - Live simulation clock and incident scan loop
 *
 * ROLE : One task advances the fleet every tick interval; a second task
 * consumes the fleet's tick events and runs the incident detector on each
 * published snapshot. A slow narrative call delays scans, never ticks.
 */

use crate::mqtt::{MqttPublisher, TOPIC_FLEET_TICK, TOPIC_INCIDENT_NEW};
use crate::state::SharedFleet;
use fleetsim_engine::{FleetEvent, IncidentDetector};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task;
use tracing::{debug, info, warn};

pub fn spawn_tick_loop(fleet: SharedFleet, every: Duration) {
    task::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let summary = fleet.lock().tick(OffsetDateTime::now_utc());
            debug!(
                tick = summary.tick,
                load = summary.load_multiplier,
                critical = summary.counts.critical,
                "fleet ticked"
            );
        }
    });
}

/// Scan one event's snapshot. Returns the number of new incidents.
pub async fn process_event(
    event: FleetEvent,
    detector: &IncidentDetector,
    publisher: Option<&MqttPublisher>,
) -> usize {
    match event {
        FleetEvent::Ticked { summary, snapshot } => {
            if let Some(p) = publisher {
                if let Err(e) = p.publish_json(TOPIC_FLEET_TICK, &summary).await {
                    warn!(error = %e, tick = summary.tick, "tick summary publish failed");
                }
            }
            let created = detector.scan(&snapshot, summary.timestamp).await;
            for incident in &created {
                if let Some(p) = publisher {
                    if let Err(e) = p.publish_json(TOPIC_INCIDENT_NEW, incident).await {
                        warn!(error = %e, incident = %incident.id, "incident publish failed");
                    }
                }
            }
            created.len()
        }
        FleetEvent::Grown { added, size } => {
            info!(added, size, "fleet grew");
            0
        }
    }
}

pub fn spawn_incident_scanner(
    mut events: broadcast::Receiver<FleetEvent>,
    detector: Arc<IncidentDetector>,
    publisher: Option<MqttPublisher>,
) {
    task::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let created = process_event(event, &detector, publisher.as_ref()).await;
                    if created > 0 {
                        info!(created, "incident scan complete");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "incident scanner lagging behind ticks, snapshots skipped");
                }
                Err(RecvError::Closed) => {
                    info!("fleet event channel closed, incident scanner stopping");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::new_state;
    use fleetsim_devkit::ServerStateBuilder;
    use fleetsim_engine::tick::{StatusCounts, TickSummary};
    use fleetsim_engine::{Fleet, FleetConfig, IncidentPolicy, ServerRole};
    use time::macros::datetime;

    fn detector() -> IncidentDetector {
        IncidentDetector::new(
            Arc::new(crate::narrative::DisabledNarrativeProvider),
            IncidentPolicy::default(),
        )
    }

    #[tokio::test]
    async fn ticked_event_runs_a_scan() {
        let snapshot = vec![
            ServerStateBuilder::new("db-01", ServerRole::Db).disk(95.0).build(),
            ServerStateBuilder::new("web-01", ServerRole::Web).build(),
        ];
        let event = FleetEvent::Ticked {
            summary: TickSummary {
                tick: 1,
                timestamp: datetime!(2024-05-01 00:10 UTC),
                load_multiplier: 0.1,
                counts: StatusCounts::from_statuses(snapshot.iter().map(|s| s.status)),
                transitions: 0,
            },
            snapshot: Arc::new(snapshot),
        };
        let detector = detector();
        assert_eq!(process_event(event, &detector, None).await, 1);
        assert_eq!(detector.active().await[0].id, "db-01-high_disk");
    }

    #[tokio::test]
    async fn scanner_follows_live_fleet() {
        let fleet = new_state(Fleet::new(
            FleetConfig { size: 8, seed: Some(5), ..Default::default() },
            datetime!(2024-05-01 00:00 UTC),
        ));
        let mut rx = fleet.lock().subscribe();
        fleet.lock().tick(datetime!(2024-05-01 00:10 UTC));
        fleet.lock().grow(1, datetime!(2024-05-01 00:11 UTC));

        let detector = detector();
        let ticked = rx.recv().await.unwrap();
        assert!(matches!(ticked, FleetEvent::Ticked { .. }));
        process_event(ticked, &detector, None).await;
        let grown = rx.recv().await.unwrap();
        assert_eq!(process_event(grown, &detector, None).await, 0);
    }
}
