use fleetsim_devkit::{ServerStateBuilder, StubBehavior, TestHarness};
use fleetsim_engine::incidents::ConditionId;
use fleetsim_engine::{IncidentPolicy, ServerRole, NARRATIVE_FALLBACK};
use std::collections::HashMap;
use time::Duration;

#[tokio::test]
async fn live_fleet_incidents_respect_dedup_window() {
    let mut harness = TestHarness::new(50, 2024);
    let incidents = harness.run(300).await;

    assert!(!incidents.is_empty(), "300 ticks should surface at least one incident");
    assert_eq!(harness.narrative.call_count(), incidents.len());

    let mut last_seen: HashMap<&str, time::OffsetDateTime> = HashMap::new();
    for incident in &incidents {
        assert!(incident.id.starts_with(&incident.hostname));
        assert!(!incident.conditions.is_empty());
        if let Some(previous) = last_seen.insert(incident.id.as_str(), incident.detected_at) {
            assert!(incident.detected_at - previous >= Duration::seconds(3600));
        }
    }
    assert!(harness.detector.recent().await.len() <= 10);
}

#[tokio::test]
async fn grouped_conditions_form_one_incident() {
    let harness = TestHarness::new(1, 1);
    let snapshot = vec![
        ServerStateBuilder::new("db-01", ServerRole::Db)
            .disk(93.0)
            .stopped("postgresql")
            .build(),
        ServerStateBuilder::new("web-01", ServerRole::Web).build(),
    ];

    let created = harness.scan_snapshot(&snapshot).await;
    assert_eq!(created.len(), 1);
    let incident = &created[0];
    assert_eq!(incident.id, "db-01-high_disk-service_stopped");
    let ids: Vec<ConditionId> = incident.conditions.iter().map(|c| c.condition).collect();
    assert_eq!(ids, vec![ConditionId::HighDisk, ConditionId::ServiceStopped]);
    assert_eq!(incident.report.metadata.problems.len(), 2);
    assert!(!incident.report.degraded);

    let prompts = harness.narrative.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("db-01"));
    assert!(prompts[0].contains("93.0%"));
    assert!(prompts[0].contains("postgresql"));
}

#[tokio::test]
async fn hanging_narrative_falls_back_after_timeout() {
    let policy = IncidentPolicy {
        narrative_timeout_ms: 25,
        ..Default::default()
    };
    let harness = TestHarness::with_policy(1, 1, policy);
    harness.narrative.set_behavior(StubBehavior::Hang);

    let snapshot = vec![
        ServerStateBuilder::new("cache-01", ServerRole::Cache).memory(91.0).build(),
        ServerStateBuilder::new("web-02", ServerRole::Web).zombies(3).build(),
    ];
    let created = harness.scan_snapshot(&snapshot).await;

    assert_eq!(created.len(), 2);
    for incident in &created {
        assert_eq!(incident.report.narrative, NARRATIVE_FALLBACK);
        assert!(incident.report.degraded);
    }
    assert_eq!(harness.detector.active().await.len(), 2);
}

#[tokio::test]
async fn incident_is_reported_again_once_window_elapses() {
    let mut harness = TestHarness::new(1, 1);
    let snapshot = vec![ServerStateBuilder::new("api-01", ServerRole::Api)
        .network_errors(4, 0)
        .build()];

    assert_eq!(harness.scan_snapshot(&snapshot).await.len(), 1);
    harness.advance_clock(Duration::minutes(59));
    assert!(harness.scan_snapshot(&snapshot).await.is_empty());
    harness.advance_clock(Duration::minutes(1));
    assert_eq!(harness.scan_snapshot(&snapshot).await.len(), 1);

    harness.advance_clock(Duration::hours(25));
    harness.detector.prune(harness.now()).await;
    assert!(harness.detector.active().await.is_empty());
    assert_eq!(harness.detector.recent().await.len(), 2);
}
