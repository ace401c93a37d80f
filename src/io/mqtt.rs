//! MQTT client for receiving detection batches from the person detector

use crate::domain::types::{epoch_ms, DetectionBatch, DetectionMessage, RawDetection, TimestampValue};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Start the MQTT client and forward parsed batches to the engine
///
/// Batches are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped batches are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    batch_tx: mpsc::Sender<DetectionBatch>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions = MqttOptions::new("spacewatch", config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    mqttoptions.set_max_packet_size(1024 * 1024, 1024 * 1024);

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_topic(), QoS::AtMostOnce).await?;

    info!(topic = %config.mqtt_topic(), host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_subscribed");

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Ok(json_str) = std::str::from_utf8(&publish.payload) else {
                            warn!(topic = %publish.topic, "invalid_utf8_payload");
                            metrics.record_message_invalid();
                            continue;
                        };

                        let batch = match parse_detection_message(json_str, epoch_ms()) {
                            Ok(batch) => batch,
                            Err(e) => {
                                debug!(error = %e, "detection_message_parse_failed");
                                metrics.record_message_invalid();
                                continue;
                            }
                        };

                        metrics.record_batch_received();
                        if let Err(e) = batch_tx.try_send(batch) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_batch_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("detection_batch_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("batch_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse a detector message into a batch
///
/// A missing or unparseable timestamp falls back to `received_ms`.
/// Entries with neither `bbox` nor `center` are kept with a missing locator;
/// the engine rejects them without evicting the entity.
pub fn parse_detection_message(
    json_str: &str,
    received_ms: u64,
) -> Result<DetectionBatch, serde_json::Error> {
    let message: DetectionMessage = serde_json::from_str(json_str)?;

    let ts = timestamp_to_epoch_ms(&message.ts).unwrap_or(received_ms);
    let detections = message.detections.into_iter().map(RawDetection::into_detection).collect();

    Ok(DetectionBatch::new(ts, detections))
}

/// Parse an RFC 3339 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .and_then(|dt| u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok())
}

fn timestamp_to_epoch_ms(ts: &TimestampValue) -> Option<u64> {
    match ts {
        TimestampValue::EpochMs(ms) => Some(*ms),
        TimestampValue::IsoString(s) => parse_iso_time(s),
        TimestampValue::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EntityId, Point};

    #[test]
    fn test_parse_batch_with_epoch_ts() {
        let json = r#"{
            "ts": 1767617600000,
            "detections": [
                {"id": 7, "bbox": [90, 80, 110, 120]},
                {"id": 8, "center": [640.0, 360.0]}
            ]
        }"#;

        let batch = parse_detection_message(json, 1).unwrap();
        assert_eq!(batch.ts, 1_767_617_600_000);
        assert_eq!(batch.detections.len(), 2);
        assert_eq!(batch.detections[0].entity_id, EntityId(7));
        assert_eq!(batch.detections[0].position(), Some(Point::new(100.0, 100.0)));
    }

    #[test]
    fn test_parse_batch_with_iso_ts() {
        let json = r#"{"ts": "2026-01-05T12:53:20.000+00:00", "detections": []}"#;
        let batch = parse_detection_message(json, 1).unwrap();
        assert_eq!(batch.ts, 1_767_617_600_000);
        assert!(batch.detections.is_empty());
    }

    #[test]
    fn test_missing_or_bad_ts_uses_receive_time() {
        let batch = parse_detection_message(r#"{"detections": []}"#, 42).unwrap();
        assert_eq!(batch.ts, 42);

        let batch = parse_detection_message(r#"{"ts": "yesterday"}"#, 43).unwrap();
        assert_eq!(batch.ts, 43);
    }

    #[test]
    fn test_entries_without_location_kept_unpositioned() {
        let json = r#"{"ts": 1, "detections": [{"id": 1}, {"id": 2, "center": [1, 1]}]}"#;
        let batch = parse_detection_message(json, 0).unwrap();
        assert_eq!(batch.detections.len(), 2);
        assert_eq!(batch.detections[0].entity_id, EntityId(1));
        assert_eq!(batch.detections[0].position(), None);
        assert_eq!(batch.detections[1].position(), Some(Point::new(1.0, 1.0)));
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_detection_message("not json", 0).is_err());
        assert!(parse_detection_message(r#"{"detections": [{"bbox": [0,0,1,1]}]}"#, 0).is_err());
    }

    #[test]
    fn test_parse_iso_time() {
        let ms = parse_iso_time("2026-01-05T16:41:30.048+00:00").unwrap();
        assert!(ms > 1_767_000_000_000, "timestamp should be in 2026");
        assert!(ms < 1_800_000_000_000, "timestamp should be before 2027");
        assert_eq!(ms % 1000, 48);

        assert!(parse_iso_time("not a timestamp").is_none());
        assert!(parse_iso_time("").is_none());
    }
}
