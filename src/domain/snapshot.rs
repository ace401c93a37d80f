//! Point-in-time outputs handed to publishers and the API
//!
//! These are owned copies; nothing here references live accumulator state.

use crate::domain::anomaly::AnomalyRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// Occupancy of one zone as seen by the last update cycles
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoneUtilization {
    /// Entities in the zone at the last update
    pub current_count: usize,
    /// `current_count / total_updates` - a naive running ratio, not a time-weighted average
    pub average: f64,
}

/// Aggregated productivity metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub productive_hours: BTreeMap<String, f64>,
    pub meeting_hours: BTreeMap<String, f64>,
    pub break_hours: BTreeMap<String, f64>,
    pub zone_utilization: BTreeMap<String, ZoneUtilization>,
    /// Most recent anomalies, oldest first
    pub anomalies: Vec<AnomalyRecord>,
}

/// Heatmap data, split into its two units
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeatmapSnapshot {
    /// Open residency intervals per zone
    pub current_occupancy: BTreeMap<String, usize>,
    /// Sum of closed residency durations per zone, in hours
    pub cumulative_hours: BTreeMap<String, f64>,
}

/// Everything a publisher needs from one cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticsSnapshot {
    pub site: String,
    /// Cycle timestamp (epoch ms)
    pub ts: u64,
    /// Update cycles processed so far
    pub cycle: u64,
    pub tracked_entities: usize,
    pub metrics: MetricsSnapshot,
    pub heatmap: HeatmapSnapshot,
}

impl AnalyticsSnapshot {
    /// Serialize to a single JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
