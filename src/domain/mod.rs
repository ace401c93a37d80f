//! Domain models - core types shared by every stage of the pipeline
//!
//! - `types` - entity ids, geometry, detections, zone types, residency intervals
//! - `anomaly` - anomaly records
//! - `snapshot` - point-in-time outputs for publishers

pub mod anomaly;
pub mod snapshot;
pub mod types;

pub use anomaly::{AnomalyKind, AnomalyRecord};
pub use snapshot::{AnalyticsSnapshot, HeatmapSnapshot, MetricsSnapshot, ZoneUtilization};
pub use types::{
    epoch_ms, Detection, DetectionBatch, EntityId, Point, ZoneResidencyInterval, ZoneType,
};
