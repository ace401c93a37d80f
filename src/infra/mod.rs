//! Infrastructure - configuration, metrics, and broker
//!
//! - `config` - TOML configuration loading and validation
//! - `metrics` - Lock-free pipeline metrics
//! - `broker` - Optional embedded MQTT broker (rumqttd)

pub mod broker;
pub mod config;
pub mod metrics;

pub use config::{Config, ConfigError, MovementPolicy, UnauthorizedPolicy, ZoneConfig};
pub use metrics::Metrics;
