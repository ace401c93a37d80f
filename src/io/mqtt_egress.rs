//! MQTT publisher for analytics snapshots
//!
//! Publishes each snapshot as one JSON document on the configured topic
//! (QoS 0, not retained).

use crate::domain::snapshot::AnalyticsSnapshot;
use crate::infra::config::Config;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("spacewatch-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);
        mqttoptions.set_max_packet_size(1024 * 1024, 1024 * 1024);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 16);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, topic: config.publish_topic().to_string() }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one snapshot. Returns false if the request could not be queued.
    pub async fn publish_snapshot(&self, snapshot: &AnalyticsSnapshot) -> bool {
        let json = snapshot.to_json();
        match self.client.publish(&self.topic, QoS::AtMostOnce, false, json.into_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, topic = %self.topic, "mqtt_egress_snapshot_failed");
                false
            }
        }
    }
}
