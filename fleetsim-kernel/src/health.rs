use crate::mqtt::{MqttPublisher, TOPIC_KERNEL_HEALTH};
use crate::state::SharedFleet;
use fleetsim_engine::tick::StatusCounts;
use fleetsim_engine::IncidentDetector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tracing::{debug, warn};
use uuid::Uuid;

pub const HEALTH_PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelHealth {
    pub instance_id: String,
    pub uptime_seconds: u64,
    pub servers_tracked: u32,
    pub ticks: u64,
    pub status_counts: StatusCounts,
    pub active_incidents: u32,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    instance_id: Uuid,
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("disabled".to_string())),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub async fn get_health(&self, fleet: &SharedFleet, detector: &IncidentDetector) -> KernelHealth {
        let (servers, ticks, status_counts) = {
            let fleet = fleet.lock();
            (fleet.len() as u32, fleet.tick_count(), fleet.status_counts())
        };
        KernelHealth {
            instance_id: self.instance_id.to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            servers_tracked: servers,
            ticks,
            status_counts,
            active_incidents: detector.active_count().await as u32,
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Publish kernel health every 30s.
    pub fn spawn_health_publisher(
        &self,
        publisher: MqttPublisher,
        fleet: SharedFleet,
        detector: Arc<IncidentDetector>,
    ) {
        let tracker = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_PUBLISH_INTERVAL);
            loop {
                interval.tick().await;
                let health = tracker.get_health(&fleet, &detector).await;
                match publisher.publish_json(TOPIC_KERNEL_HEALTH, &health).await {
                    Ok(()) => debug!(
                        uptime = health.uptime_seconds,
                        servers = health.servers_tracked,
                        "kernel health published"
                    ),
                    Err(e) => warn!(error = %e, "kernel health publish failed"),
                }
            }
        });
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}
