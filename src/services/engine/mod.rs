//! Update-cycle orchestration
//!
//! The AnalyticsEngine owns every piece of mutable analytics state and
//! applies one detection batch per cycle:
//! - Residency transitions (close/open intervals per entity)
//! - Hours accounting for closed intervals
//! - Idle and unauthorized-access checks
//! - Eviction of entities absent from the batch
//! - Zone occupancy update
//!
//! All state lives on one task; readers get owned snapshots through the
//! snapshot channel.

mod handlers;

use crate::domain::anomaly::AnomalyRecord;
use crate::domain::snapshot::{AnalyticsSnapshot, HeatmapSnapshot, MetricsSnapshot};
use crate::domain::types::{DetectionBatch, EntityId, ZoneResidencyInterval};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::snapshot_channel::SnapshotSender;
use crate::services::aggregator::MetricsAggregator;
use crate::services::anomaly_detector::AnomalyDetector;
use crate::services::residency::ResidencyTracker;
use crate::services::zone_map::ZoneMap;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// What one update cycle changed
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Effective cycle timestamp (epoch ms)
    pub ts: u64,
    /// Intervals closed by zone changes (and orphans closed at last-seen, if enabled)
    pub closed: Vec<ZoneResidencyInterval>,
    /// Open intervals of evicted entities
    pub orphaned: Vec<ZoneResidencyInterval>,
    pub evicted: Vec<EntityId>,
    pub anomalies: Vec<AnomalyRecord>,
    /// Detections skipped (malformed position or duplicate id)
    pub rejected: usize,
}

/// Central processor for detection batches
pub struct AnalyticsEngine {
    pub(crate) site_id: String,
    pub(crate) zone_map: Arc<ZoneMap>,
    pub(crate) residency: ResidencyTracker,
    pub(crate) aggregator: MetricsAggregator,
    pub(crate) detector: AnomalyDetector,
    pub(crate) metrics: Arc<Metrics>,
    /// Close evicted entities' intervals at last-seen instead of discarding them
    pub(crate) close_orphans_at_last_seen: bool,
    /// Timestamp of the last processed cycle (epoch ms)
    pub(crate) last_cycle_ts: Option<u64>,
    pub(crate) cycles: u64,
}

impl AnalyticsEngine {
    pub fn new(config: &Config, zone_map: Arc<ZoneMap>, metrics: Arc<Metrics>) -> Self {
        Self {
            site_id: config.site_id().to_string(),
            residency: ResidencyTracker::new(zone_map.clone()),
            aggregator: MetricsAggregator::new(zone_map.clone(), config.anomaly_retention()),
            detector: AnomalyDetector::new(config),
            zone_map,
            metrics,
            close_orphans_at_last_seen: config.close_orphans_at_last_seen(),
            last_cycle_ts: None,
            cycles: 0,
        }
    }

    /// Consume batches until the channel closes or shutdown is signalled
    ///
    /// A fresh snapshot is published after every cycle.
    pub async fn run(
        mut self,
        mut batch_rx: mpsc::Receiver<DetectionBatch>,
        snapshots: SnapshotSender,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(site = %self.site_id, zones = %self.zone_map.len(), "engine_started");

        loop {
            tokio::select! {
                batch = batch_rx.recv() => {
                    match batch {
                        Some(batch) => {
                            self.update(&batch);
                            snapshots.publish(self.snapshot());
                        }
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(cycles = %self.cycles, open_intervals = %self.residency.open_intervals().count(), "engine_stopped");
    }

    /// Apply one detection batch
    pub fn update(&mut self, batch: &DetectionBatch) -> CycleReport {
        let start = Instant::now();
        let now = self.cycle_ts(batch.ts);
        let mut report = CycleReport { ts: now, ..Default::default() };

        let mut present: FxHashSet<EntityId> =
            FxHashSet::with_capacity_and_hasher(batch.detections.len(), Default::default());
        for detection in &batch.detections {
            self.handle_detection(detection, now, &mut present, &mut report);
        }

        self.handle_evictions(&present, &mut report);
        self.aggregator.update_occupancy(&self.residency.zone_occupancy());

        self.cycles += 1;
        self.metrics.set_tracked_entities(self.residency.tracked_count());
        self.metrics.record_cycle(start.elapsed().as_micros() as u64, batch.detections.len() as u64);

        debug!(
            ts = %now,
            detections = %batch.detections.len(),
            closed = %report.closed.len(),
            evicted = %report.evicted.len(),
            anomalies = %report.anomalies.len(),
            "cycle_complete"
        );
        report
    }

    /// Cycle timestamps never go backwards; a late batch is processed at the
    /// previous cycle's time.
    fn cycle_ts(&mut self, ts: u64) -> u64 {
        let now = match self.last_cycle_ts {
            Some(last) if ts < last => {
                debug!(batch_ts = %ts, last_ts = %last, "batch_ts_clamped");
                last
            }
            _ => ts,
        };
        self.last_cycle_ts = Some(now);
        now
    }

    /// Accumulated metrics (owned copy)
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.aggregator.get_metrics()
    }

    /// Live occupancy and cumulative hours per zone (owned copy)
    pub fn get_heatmap(&self) -> HeatmapSnapshot {
        self.aggregator.heatmap(self.residency.current_occupancy())
    }

    /// Point-in-time copy of everything a publisher needs
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            site: self.site_id.clone(),
            ts: self.last_cycle_ts.unwrap_or(0),
            cycle: self.cycles,
            tracked_entities: self.residency.tracked_count(),
            metrics: self.get_metrics(),
            heatmap: self.get_heatmap(),
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn tracked_entities(&self) -> usize {
        self.residency.tracked_count()
    }
}
