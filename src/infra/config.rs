//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` (default: config/dev.toml).
//! Zone and analytics settings are mandatory; a missing or malformed file is
//! fatal at startup. Everything else has defaults.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration errors (fatal at load time)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("no zones configured")]
    NoZones,
    #[error("zone name '{0}' is configured more than once")]
    DuplicateZone(String),
    #[error("zone '{name}' needs at least 3 vertices, got {vertices}")]
    DegeneratePolygon { name: String, vertices: usize },
    #[error("zone '{0}' has a non-finite coordinate")]
    NonFiniteCoordinate(String),
    #[error("invalid threshold {field}: {reason}")]
    InvalidThreshold { field: &'static str, reason: String },
}

/// How repeated unauthorized-access observations are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthorizedPolicy {
    /// One record per cycle while the entity stays in the restricted zone
    #[default]
    EveryCycle,
    /// At most one record per entity and zone every `unauthorized_alert_threshold` seconds
    Cooldown,
}

/// What counts as "movement" for idle detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementPolicy {
    /// Being inside any zone refreshes the movement timestamp
    #[default]
    Presence,
    /// Only displacement of at least `movement_min_px` refreshes it
    Displacement,
}

/// One `[[zones]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: crate::domain::ZoneType,
    /// Polygon vertices `[[x, y], ...]` in frame pixels
    pub coordinates: Vec<[f64; 2]>,
    #[serde(default)]
    pub max_capacity: Option<u32>,
    #[serde(default)]
    pub restricted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site identifier included in every published snapshot
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "office".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic the detector publishes detection batches to
    #[serde(default = "default_detections_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_detections_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_detections_topic() -> String {
    "spacewatch/detections".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Start an embedded broker for standalone runs
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { enabled: false, bind_address: default_broker_bind_address(), port: default_mqtt_port() }
    }
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    pub idle_threshold_seconds: f64,
    pub unauthorized_alert_threshold: f64,
    #[serde(default)]
    pub unauthorized_policy: UnauthorizedPolicy,
    #[serde(default)]
    pub movement: MovementPolicy,
    #[serde(default = "default_movement_min_px")]
    pub movement_min_px: f64,
    /// Number of anomalies kept for snapshots
    #[serde(default = "default_anomaly_retention")]
    pub anomaly_retention: usize,
    /// Detection batches buffered between ingest and the engine
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Close an evicted entity's open interval at its last-seen time instead of discarding it
    #[serde(default)]
    pub close_orphans_at_last_seen: bool,
}

fn default_movement_min_px() -> f64 {
    5.0
}

fn default_anomaly_retention() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_publish_interval")]
    pub interval_secs: u64,
    /// JSONL snapshot file, empty to disable
    #[serde(default = "default_publish_file")]
    pub file: String,
    #[serde(default = "default_true")]
    pub mqtt_enabled: bool,
    #[serde(default = "default_publish_topic")]
    pub topic: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_publish_interval(),
            file: default_publish_file(),
            mqtt_enabled: true,
            topic: default_publish_topic(),
        }
    }
}

fn default_publish_interval() -> u64 {
    5
}

fn default_publish_file() -> String {
    "snapshots.jsonl".to_string()
}

fn default_publish_topic() -> String {
    "spacewatch/metrics".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP API port (0 to disable)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: default_api_port() }
    }
}

fn default_api_port() -> u16 {
    8081
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Pipeline metrics log interval
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    idle_threshold_seconds: f64,
    unauthorized_alert_threshold: f64,
    unauthorized_policy: UnauthorizedPolicy,
    movement_policy: MovementPolicy,
    movement_min_px: f64,
    anomaly_retention: usize,
    queue_capacity: usize,
    close_orphans_at_last_seen: bool,
    publish_interval_secs: u64,
    publish_file: String,
    publish_mqtt_enabled: bool,
    publish_topic: String,
    api_port: u16,
    metrics_interval_secs: u64,
    zones: Vec<ZoneConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_topic: default_detections_topic(),
            mqtt_username: None,
            mqtt_password: None,
            broker_enabled: false,
            broker_bind_address: default_broker_bind_address(),
            broker_port: default_mqtt_port(),
            idle_threshold_seconds: 300.0,
            unauthorized_alert_threshold: 60.0,
            unauthorized_policy: UnauthorizedPolicy::EveryCycle,
            movement_policy: MovementPolicy::Presence,
            movement_min_px: default_movement_min_px(),
            anomaly_retention: default_anomaly_retention(),
            queue_capacity: default_queue_capacity(),
            close_orphans_at_last_seen: false,
            publish_interval_secs: default_publish_interval(),
            publish_file: default_publish_file(),
            publish_mqtt_enabled: true,
            publish_topic: default_publish_topic(),
            api_port: default_api_port(),
            metrics_interval_secs: default_metrics_interval(),
            zones: Self::default_zones(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Office layout for a 1280x720 frame
    fn default_zones() -> Vec<ZoneConfig> {
        fn rect(name: &str, zone_type: &str, x1: f64, y1: f64, x2: f64, y2: f64) -> ZoneConfig {
            ZoneConfig {
                name: name.to_string(),
                zone_type: zone_type.to_string().into(),
                coordinates: vec![[x1, y1], [x2, y1], [x2, y2], [x1, y2]],
                max_capacity: None,
                restricted: false,
            }
        }

        let mut zones = vec![
            rect("Desk Area 1", "desk", 0.0, 0.0, 400.0, 360.0),
            rect("Desk Area 2", "desk", 0.0, 360.0, 400.0, 720.0),
            rect("Meeting Room 1", "meeting", 400.0, 0.0, 880.0, 360.0),
            rect("Meeting Room 2", "meeting", 400.0, 360.0, 880.0, 720.0),
            rect("Break Area 1", "break", 880.0, 0.0, 1280.0, 720.0),
        ];
        for (zone, capacity) in zones.iter_mut().zip([4, 4, 8, 6, 10]) {
            zone.max_capacity = Some(capacity);
        }
        zones
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str, source_name: &str) -> Result<Self, ConfigError> {
        let toml_config: TomlConfig = toml::from_str(content)
            .map_err(|source| ConfigError::Parse { path: source_name.to_string(), source })?;

        validate_analytics(&toml_config.analytics)?;
        validate_zones(&toml_config.zones)?;

        let analytics = toml_config.analytics;
        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            idle_threshold_seconds: analytics.idle_threshold_seconds,
            unauthorized_alert_threshold: analytics.unauthorized_alert_threshold,
            unauthorized_policy: analytics.unauthorized_policy,
            movement_policy: analytics.movement,
            movement_min_px: analytics.movement_min_px,
            anomaly_retention: analytics.anomaly_retention,
            queue_capacity: analytics.queue_capacity,
            close_orphans_at_last_seen: analytics.close_orphans_at_last_seen,
            publish_interval_secs: toml_config.publish.interval_secs,
            publish_file: toml_config.publish.file,
            publish_mqtt_enabled: toml_config.publish.mqtt_enabled,
            publish_topic: toml_config.publish.topic,
            api_port: toml_config.api.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            zones: toml_config.zones,
            config_file: source_name.to_string(),
        })
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn idle_threshold_seconds(&self) -> f64 {
        self.idle_threshold_seconds
    }

    pub fn unauthorized_alert_threshold(&self) -> f64 {
        self.unauthorized_alert_threshold
    }

    pub fn unauthorized_policy(&self) -> UnauthorizedPolicy {
        self.unauthorized_policy
    }

    pub fn movement_policy(&self) -> MovementPolicy {
        self.movement_policy
    }

    pub fn movement_min_px(&self) -> f64 {
        self.movement_min_px
    }

    pub fn anomaly_retention(&self) -> usize {
        self.anomaly_retention
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn close_orphans_at_last_seen(&self) -> bool {
        self.close_orphans_at_last_seen
    }

    pub fn publish_interval_secs(&self) -> u64 {
        self.publish_interval_secs
    }

    pub fn publish_file(&self) -> &str {
        &self.publish_file
    }

    pub fn publish_mqtt_enabled(&self) -> bool {
        self.publish_mqtt_enabled
    }

    pub fn publish_topic(&self) -> &str {
        &self.publish_topic
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn zones(&self) -> &[ZoneConfig] {
        &self.zones
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the idle threshold
    pub fn with_idle_threshold_seconds(mut self, secs: f64) -> Self {
        self.idle_threshold_seconds = secs;
        self
    }

    /// Builder method for tests to set the movement policy
    pub fn with_movement_policy(mut self, policy: MovementPolicy, min_px: f64) -> Self {
        self.movement_policy = policy;
        self.movement_min_px = min_px;
        self
    }

    /// Builder method for tests to set the unauthorized-access policy
    pub fn with_unauthorized_policy(mut self, policy: UnauthorizedPolicy, threshold: f64) -> Self {
        self.unauthorized_policy = policy;
        self.unauthorized_alert_threshold = threshold;
        self
    }

    /// Builder method for tests to replace the zone layout
    pub fn with_zones(mut self, zones: Vec<ZoneConfig>) -> Self {
        self.zones = zones;
        self
    }

    /// Builder method for tests to close orphaned intervals at last-seen time
    pub fn with_close_orphans_at_last_seen(mut self, enabled: bool) -> Self {
        self.close_orphans_at_last_seen = enabled;
        self
    }
}

fn validate_analytics(analytics: &AnalyticsConfig) -> Result<(), ConfigError> {
    let positive = |field: &'static str, value: f64| {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidThreshold { field, reason: format!("must be > 0, got {value}") })
        }
    };

    positive("idle_threshold_seconds", analytics.idle_threshold_seconds)?;
    if !analytics.unauthorized_alert_threshold.is_finite()
        || analytics.unauthorized_alert_threshold < 0.0
    {
        return Err(ConfigError::InvalidThreshold {
            field: "unauthorized_alert_threshold",
            reason: format!("must be >= 0, got {}", analytics.unauthorized_alert_threshold),
        });
    }
    if analytics.movement == MovementPolicy::Displacement {
        positive("movement_min_px", analytics.movement_min_px)?;
    }
    if analytics.anomaly_retention == 0 {
        return Err(ConfigError::InvalidThreshold {
            field: "anomaly_retention",
            reason: "must be at least 1".to_string(),
        });
    }
    if analytics.queue_capacity == 0 {
        return Err(ConfigError::InvalidThreshold {
            field: "queue_capacity",
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Check zone definitions: non-empty, unique names, real polygons
pub fn validate_zones(zones: &[ZoneConfig]) -> Result<(), ConfigError> {
    if zones.is_empty() {
        return Err(ConfigError::NoZones);
    }

    let mut seen = HashSet::with_capacity(zones.len());
    for zone in zones {
        if !seen.insert(zone.name.as_str()) {
            return Err(ConfigError::DuplicateZone(zone.name.clone()));
        }
        if zone.coordinates.len() < 3 {
            return Err(ConfigError::DegeneratePolygon {
                name: zone.name.clone(),
                vertices: zone.coordinates.len(),
            });
        }
        if zone.coordinates.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ConfigError::NonFiniteCoordinate(zone.name.clone()));
        }
    }
    Ok(())
}
