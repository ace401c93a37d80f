//! Periodic snapshot publishing
//!
//! Reads the latest engine snapshot on a fixed interval and hands it to the
//! configured sinks (JSONL file, MQTT). The engine is never blocked; a
//! snapshot that has not changed since the last publish is skipped.

use crate::io::egress::SnapshotEgress;
use crate::io::mqtt_egress::MqttPublisher;
use crate::io::snapshot_channel::SnapshotReceiver;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct SnapshotPublisher {
    snapshots: SnapshotReceiver,
    egress: Option<SnapshotEgress>,
    mqtt: Option<MqttPublisher>,
    interval: Duration,
    last_published_cycle: Option<u64>,
}

impl SnapshotPublisher {
    pub fn new(snapshots: SnapshotReceiver, interval: Duration) -> Self {
        Self { snapshots, egress: None, mqtt: None, interval, last_published_cycle: None }
    }

    pub fn with_egress(mut self, egress: SnapshotEgress) -> Self {
        self.egress = Some(egress);
        self
    }

    pub fn with_mqtt(mut self, mqtt: MqttPublisher) -> Self {
        self.mqtt = Some(mqtt);
        self
    }

    /// Publish the current snapshot if it is new. Returns true if published.
    pub async fn publish_latest(&mut self) -> bool {
        let snapshot = self.snapshots.latest();
        if snapshot.cycle == 0 || self.last_published_cycle == Some(snapshot.cycle) {
            return false;
        }

        if let Some(ref egress) = self.egress {
            egress.write_snapshot(&snapshot);
        }
        if let Some(ref mqtt) = self.mqtt {
            mqtt.publish_snapshot(&snapshot).await;
        }

        debug!(cycle = %snapshot.cycle, anomalies = %snapshot.metrics.anomalies.len(), "snapshot_published");
        self.last_published_cycle = Some(snapshot.cycle);
        true
    }

    /// Publish on the configured interval until shutdown
    ///
    /// A final snapshot is published on shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = %self.interval.as_secs(),
            file = ?self.egress.as_ref().map(|e| e.file_path().to_string()),
            topic = ?self.mqtt.as_ref().map(|m| m.topic().to_string()),
            "publisher_started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.publish_latest().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.publish_latest().await;
                        info!("publisher_shutdown");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::AnalyticsSnapshot;
    use crate::io::snapshot_channel::create_snapshot_channel;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_publishes_only_new_cycles() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("out.jsonl");
        let (tx, rx) = create_snapshot_channel("office");
        let mut publisher = SnapshotPublisher::new(rx, Duration::from_secs(5))
            .with_egress(SnapshotEgress::new(file_path.to_str().unwrap()));

        // nothing processed yet
        assert!(!publisher.publish_latest().await);

        tx.publish(AnalyticsSnapshot { site: "office".to_string(), cycle: 1, ..Default::default() });
        assert!(publisher.publish_latest().await);
        assert!(!publisher.publish_latest().await);

        tx.publish(AnalyticsSnapshot { site: "office".to_string(), cycle: 4, ..Default::default() });
        assert!(publisher.publish_latest().await);

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_run_publishes_final_snapshot_on_shutdown() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("out.jsonl");
        let (tx, rx) = create_snapshot_channel("office");
        let publisher = SnapshotPublisher::new(rx, Duration::from_secs(3600))
            .with_egress(SnapshotEgress::new(file_path.to_str().unwrap()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(publisher.run(shutdown_rx));
        tokio::task::yield_now().await;

        tx.publish(AnalyticsSnapshot { site: "office".to_string(), cycle: 9, ..Default::default() });
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        let last: serde_json::Value = serde_json::from_str(content.lines().last().unwrap()).unwrap();
        assert_eq!(last["cycle"], 9);
    }
}
