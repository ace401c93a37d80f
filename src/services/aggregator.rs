//! Accumulates hours per zone type, zone utilization, and the anomaly log
//!
//! Only closed intervals contribute hours. Open intervals show up in
//! current occupancy, never in hour totals.

use crate::domain::anomaly::AnomalyRecord;
use crate::domain::snapshot::{HeatmapSnapshot, MetricsSnapshot, ZoneUtilization};
use crate::domain::types::{EntityId, ZoneResidencyInterval, ZoneType};
use crate::services::zone_map::ZoneMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, Default)]
struct UtilizationCounter {
    current: usize,
    total_updates: u64,
}

pub struct MetricsAggregator {
    zone_map: Arc<ZoneMap>,
    productive_hours: BTreeMap<String, f64>,
    meeting_hours: BTreeMap<String, f64>,
    break_hours: BTreeMap<String, f64>,
    /// Closed hours per zone regardless of type
    cumulative_hours: BTreeMap<String, f64>,
    utilization: BTreeMap<String, UtilizationCounter>,
    anomalies: VecDeque<AnomalyRecord>,
    anomaly_retention: usize,
}

impl MetricsAggregator {
    pub fn new(zone_map: Arc<ZoneMap>, anomaly_retention: usize) -> Self {
        Self {
            zone_map,
            productive_hours: BTreeMap::new(),
            meeting_hours: BTreeMap::new(),
            break_hours: BTreeMap::new(),
            cumulative_hours: BTreeMap::new(),
            utilization: BTreeMap::new(),
            anomalies: VecDeque::with_capacity(anomaly_retention),
            anomaly_retention,
        }
    }

    /// Add a closed interval's duration to its zone-type bucket
    ///
    /// Returns the hours credited, or None if the interval was not accepted.
    pub fn record_interval(&mut self, interval: &ZoneResidencyInterval) -> Option<f64> {
        let Some(end) = interval.end_time else {
            warn!(entity_id = %interval.entity_id, zone = %interval.zone_name, "open_interval_ignored");
            return None;
        };
        let Some(zone) = self.zone_map.get(&interval.zone_name) else {
            warn!(zone = %interval.zone_name, "interval_for_unknown_zone");
            return None;
        };

        let hours = end.saturating_sub(interval.start_time) as f64 / MS_PER_HOUR;
        let bucket = match zone.zone_type {
            ZoneType::Desk => Some(&mut self.productive_hours),
            ZoneType::Meeting => Some(&mut self.meeting_hours),
            ZoneType::Break => Some(&mut self.break_hours),
            ZoneType::Other => None,
        };
        if let Some(bucket) = bucket {
            *bucket.entry(zone.name.clone()).or_insert(0.0) += hours;
        }
        *self.cumulative_hours.entry(zone.name.clone()).or_insert(0.0) += hours;

        debug!(
            entity_id = %interval.entity_id,
            zone = %zone.name,
            zone_type = zone.zone_type.as_str(),
            hours = %format!("{hours:.4}"),
            "interval_recorded"
        );
        Some(hours)
    }

    /// Replace current counts with this cycle's occupancy
    ///
    /// Every zone's update counter advances, so callers should pass every
    /// configured zone (empty sets included) exactly once per cycle.
    pub fn update_occupancy(&mut self, occupancy: &BTreeMap<String, BTreeSet<EntityId>>) {
        for (zone, ids) in occupancy {
            let counter = self.utilization.entry(zone.clone()).or_default();
            counter.current = ids.len();
            counter.total_updates += 1;
        }
    }

    /// Append to the anomaly log, dropping the oldest past retention
    pub fn record_anomaly(&mut self, record: AnomalyRecord) {
        if self.anomaly_retention == 0 {
            return;
        }
        while self.anomalies.len() >= self.anomaly_retention {
            self.anomalies.pop_front();
        }
        self.anomalies.push_back(record);
    }

    /// Owned copy of the accumulated metrics
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let zone_utilization = self
            .utilization
            .iter()
            .map(|(zone, counter)| {
                let average = if counter.total_updates == 0 {
                    0.0
                } else {
                    counter.current as f64 / counter.total_updates as f64
                };
                (zone.clone(), ZoneUtilization { current_count: counter.current, average })
            })
            .collect();

        MetricsSnapshot {
            productive_hours: self.productive_hours.clone(),
            meeting_hours: self.meeting_hours.clone(),
            break_hours: self.break_hours.clone(),
            zone_utilization,
            anomalies: self.anomalies.iter().cloned().collect(),
        }
    }

    /// Heatmap: live occupancy from the tracker plus closed hours per zone
    pub fn heatmap(&self, current_occupancy: BTreeMap<String, usize>) -> HeatmapSnapshot {
        HeatmapSnapshot { current_occupancy, cumulative_hours: self.cumulative_hours.clone() }
    }
}
