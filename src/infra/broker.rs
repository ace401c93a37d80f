//! Embedded MQTT broker for standalone demo runs
//!
//! Lets the detector, the engine and the dashboard meet on one host without
//! an external broker. Disabled unless `[broker] enabled = true`.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Detection batches carry a handful of boxes; 256 KiB is generous
const MAX_PAYLOAD_BYTES: usize = 262_144;

fn server_settings(listen: SocketAddr) -> ServerSettings {
    ServerSettings {
        name: "v4".to_string(),
        listen,
        tls: None,
        next_connection_delay_ms: 1,
        connections: ConnectionSettings {
            connection_timeout_ms: 5000,
            max_payload_size: MAX_PAYLOAD_BYTES,
            max_inflight_count: 100,
            auth: None,
            dynamic_filters: false,
            external_auth: None,
        },
    }
}

/// Start the embedded broker on its own thread if enabled
///
/// Returns false when disabled or the bind address is invalid.
pub fn start_embedded_broker(app_config: &AppConfig) -> bool {
    if !app_config.broker_enabled() {
        return false;
    }

    let addr_str = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen: SocketAddr = match addr_str.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, addr = %addr_str, "broker_invalid_bind_address");
            return false;
        }
    };

    let router = RouterConfig {
        max_segment_size: 10 * 1024 * 1024,
        max_segment_count: 4,
        max_connections: 64,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let config = Config {
        id: 0,
        router,
        v4: Some(HashMap::from([("v4".to_string(), server_settings(listen))])),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    };

    thread::spawn(move || {
        // start() blocks for the lifetime of the broker
        if let Err(e) = Broker::new(config).start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    // Give the listener a moment before clients connect
    thread::sleep(Duration::from_millis(100));
    info!(addr = %listen, "broker_started");
    true
}
