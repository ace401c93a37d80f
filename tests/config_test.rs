//! Integration tests for configuration loading

use spacewatch::domain::ZoneType;
use spacewatch::infra::{Config, ConfigError, MovementPolicy, UnauthorizedPolicy};
use spacewatch::services::ZoneMap;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[mqtt]
host = "test-host"
port = 1884
topic = "office/cam1/detections"

[analytics]
idle_threshold_seconds = 120
unauthorized_alert_threshold = 30
unauthorized_policy = "cooldown"
anomaly_retention = 50

[publish]
interval_secs = 2
file = ""
mqtt_enabled = false

[api]
port = 9091

[[zones]]
name = "Desk Area 1"
type = "productive"
coordinates = [[0, 0], [400, 0], [400, 360], [0, 360]]
max_capacity = 4

[[zones]]
name = "Huddle"
type = "collaborative"
coordinates = [[400, 0], [880, 0], [640, 360]]

[[zones]]
name = "Server Room"
type = "storage"
coordinates = [[880, 0], [1280, 0], [1280, 360], [880, 360]]
restricted = true
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic(), "office/cam1/detections");
    assert_eq!(config.idle_threshold_seconds(), 120.0);
    assert_eq!(config.unauthorized_alert_threshold(), 30.0);
    assert_eq!(config.unauthorized_policy(), UnauthorizedPolicy::Cooldown);
    assert_eq!(config.movement_policy(), MovementPolicy::Presence);
    assert_eq!(config.anomaly_retention(), 50);
    assert_eq!(config.publish_file(), "");
    assert!(!config.publish_mqtt_enabled());
    assert_eq!(config.api_port(), 9091);

    let zones = config.zones();
    assert_eq!(zones.len(), 3);
    assert_eq!(zones[0].zone_type, ZoneType::Desk);
    assert_eq!(zones[1].zone_type, ZoneType::Meeting);
    assert_eq!(zones[2].zone_type, ZoneType::Other);
    assert!(zones[2].restricted);

    let zone_map = ZoneMap::from_config(zones).unwrap();
    assert_eq!(zone_map.len(), 3);
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Config::from_file("/nonexistent/config.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("/nonexistent/config.toml"));
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[analytics\nidle_threshold_seconds = ").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_dev_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();

    assert!(config.broker_enabled());
    let zone_map = ZoneMap::from_config(config.zones()).unwrap();
    assert!(zone_map.zones().iter().any(|z| z.restricted));
}
