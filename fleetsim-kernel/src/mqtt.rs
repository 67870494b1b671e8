use crate::config::MqttConf;
use crate::health::HealthTracker;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::task;
use tracing::{info, warn};

pub const TOPIC_FLEET_TICK: &str = "fleetsim/fleet/tick@v1";
pub const TOPIC_INCIDENT_NEW: &str = "fleetsim/incidents/new@v1";
pub const TOPIC_KERNEL_HEALTH: &str = "fleetsim/kernel/health@v1";

/// Publish-only MQTT handle; the event loop runs in its own task.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub async fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

pub fn spawn_mqtt_publisher(conf: &MqttConf, health: HealthTracker) -> MqttPublisher {
    let mut opts = MqttOptions::new("fleetsim-kernel", conf.host.clone(), conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    let (client, mut eventloop) = AsyncClient::new(opts, 64);
    health.mark_mqtt_connecting();
    info!(host = %conf.host, port = conf.port, "MQTT publisher starting");

    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    info!("MQTT connected");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = ?e, "MQTT error, retrying");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    MqttPublisher { client }
}
