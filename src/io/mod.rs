//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT client receiving detection batches
//! - `snapshot_channel` - Latest-snapshot channel from the engine to readers
//! - `publisher` - Periodic snapshot publishing to the sinks below
//! - `egress` - Snapshot output to file (JSONL format)
//! - `mqtt_egress` - Snapshot output to an MQTT topic
//! - `api` - HTTP API (JSON views and Prometheus text)

pub mod api;
pub mod egress;
pub mod mqtt;
pub mod mqtt_egress;
pub mod publisher;
pub mod snapshot_channel;

pub use api::{start_api_server, ApiState};
pub use egress::SnapshotEgress;
pub use mqtt_egress::MqttPublisher;
pub use publisher::SnapshotPublisher;
pub use snapshot_channel::{create_snapshot_channel, SnapshotReceiver, SnapshotSender};
