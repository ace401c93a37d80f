//! Per-detection and eviction handling for the AnalyticsEngine

use super::{AnalyticsEngine, CycleReport};
use crate::domain::types::{Detection, EntityId};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

impl AnalyticsEngine {
    /// Process one detection: residency, hours, movement, checks
    ///
    /// A malformed detection is skipped without affecting the rest of the
    /// batch. Only the first detection of a duplicated id is used.
    pub(crate) fn handle_detection(
        &mut self,
        detection: &Detection,
        now: u64,
        present: &mut FxHashSet<EntityId>,
        report: &mut CycleReport,
    ) {
        let id = detection.entity_id;

        if present.contains(&id) {
            warn!(entity_id = %id, "duplicate_detection_skipped");
            self.metrics.record_detection_rejected();
            report.rejected += 1;
            return;
        }

        let Some(position) = detection.position() else {
            warn!(entity_id = %id, locator = ?detection.locator, "invalid_detection_skipped");
            self.metrics.record_detection_rejected();
            report.rejected += 1;
            // still seen this cycle, so it is not evicted
            present.insert(id);
            return;
        };
        present.insert(id);

        let transition = self.residency.observe(id, position, now);
        if transition.created {
            debug!(entity_id = %id, x = %position.x, y = %position.y, "entity_created");
        }
        if transition.zone_changed() {
            self.metrics.record_zone_transition();
        }
        if let Some(closed) = transition.closed {
            if self.aggregator.record_interval(&closed).is_some() {
                self.metrics.record_interval_closed();
            }
            report.closed.push(closed);
        }

        let zone = self.residency.entity(id).and_then(|e| e.current_zone.as_deref());
        let zone = zone.and_then(|name| self.zone_map.get(name));

        self.detector.observe(id, zone, position, now);
        for record in self.detector.check(id, zone, now) {
            self.metrics.record_anomaly(record.kind);
            self.aggregator.record_anomaly(record.clone());
            report.anomalies.push(record);
        }
    }

    /// Remove every entity not present in this batch
    ///
    /// Open intervals of evicted entities are discarded unless
    /// `close_orphans_at_last_seen` is set, in which case they are closed
    /// at the entity's last-seen time and counted.
    pub(crate) fn handle_evictions(
        &mut self,
        present: &FxHashSet<EntityId>,
        report: &mut CycleReport,
    ) {
        for eviction in self.residency.evict_absent(present) {
            let id = eviction.entity.id;
            self.detector.forget(id);
            self.metrics.record_eviction(eviction.orphaned.is_some());
            report.evicted.push(id);

            let Some(orphan) = eviction.orphaned else {
                debug!(entity_id = %id, last_seen = %eviction.entity.last_seen, "entity_evicted");
                continue;
            };

            if self.close_orphans_at_last_seen {
                let closed = orphan.clone().close(eviction.entity.last_seen);
                if self.aggregator.record_interval(&closed).is_some() {
                    self.metrics.record_interval_closed();
                }
                debug!(entity_id = %id, zone = %closed.zone_name, "orphan_closed_at_last_seen");
                report.closed.push(closed);
            } else {
                warn!(
                    entity_id = %id,
                    zone = %orphan.zone_name,
                    start_time = %orphan.start_time,
                    "orphaned_interval_discarded"
                );
            }
            report.orphaned.push(orphan);
        }
    }
}
