//! Services - analytics state and business logic
//!
//! - `zone_map` - Static zone polygons and point lookup
//! - `residency` - Per-entity zone residency state machine
//! - `aggregator` - Hours by zone type, utilization, anomaly log
//! - `anomaly_detector` - Idle-time and unauthorized-access checks
//! - `engine` - Update-cycle orchestrator that owns all of the above

pub mod aggregator;
pub mod anomaly_detector;
pub mod engine;
pub mod residency;
pub mod zone_map;

pub use aggregator::MetricsAggregator;
pub use anomaly_detector::AnomalyDetector;
pub use engine::{AnalyticsEngine, CycleReport};
pub use residency::ResidencyTracker;
pub use zone_map::{Zone, ZoneMap};
