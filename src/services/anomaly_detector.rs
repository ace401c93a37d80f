//! Idle-time and unauthorized-access detection
//!
//! The detector keeps its own per-entity movement marks; it never touches
//! residency or aggregator state. Callers append the returned records to
//! the anomaly log.

use crate::domain::anomaly::AnomalyRecord;
use crate::domain::types::{EntityId, Point, ZoneType};
use crate::infra::config::{Config, MovementPolicy, UnauthorizedPolicy};
use crate::services::zone_map::Zone;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::info;

/// Last time an entity counted as moving, and where
#[derive(Debug, Clone, Copy)]
struct MovementMark {
    at: u64,
    anchor: Point,
}

pub struct AnomalyDetector {
    idle_threshold_secs: f64,
    movement: MovementPolicy,
    movement_min_px: f64,
    unauthorized: UnauthorizedPolicy,
    unauthorized_cooldown_ms: u64,
    last_movement: FxHashMap<EntityId, MovementMark>,
    /// (entity, zone) -> last unauthorized record ts, Cooldown policy only
    last_unauthorized: FxHashMap<(EntityId, String), u64>,
}

impl AnomalyDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            idle_threshold_secs: config.idle_threshold_seconds(),
            movement: config.movement_policy(),
            movement_min_px: config.movement_min_px(),
            unauthorized: config.unauthorized_policy(),
            unauthorized_cooldown_ms: (config.unauthorized_alert_threshold() * 1000.0) as u64,
            last_movement: FxHashMap::default(),
            last_unauthorized: FxHashMap::default(),
        }
    }

    /// Update the movement mark for an observation
    ///
    /// Under `Presence`, being in any zone counts as movement. Under
    /// `Displacement`, the mark only moves once the entity has travelled
    /// `movement_min_px` from where it was last marked.
    pub fn observe(&mut self, id: EntityId, zone: Option<&Zone>, position: Point, now: u64) {
        match self.movement {
            MovementPolicy::Presence => {
                if zone.is_some() {
                    self.record_movement(id, position, now);
                }
            }
            MovementPolicy::Displacement => {
                let moved = match self.last_movement.get(&id) {
                    None => true,
                    Some(mark) => mark.anchor.distance_to(&position) >= self.movement_min_px,
                };
                if moved {
                    self.record_movement(id, position, now);
                }
            }
        }
    }

    /// Unconditionally mark the entity as moving at `now`
    pub fn record_movement(&mut self, id: EntityId, position: Point, now: u64) {
        self.last_movement.insert(id, MovementMark { at: now, anchor: position });
    }

    /// Seconds since the entity last moved, if it ever did
    pub fn idle_secs(&self, id: EntityId, now: u64) -> Option<f64> {
        self.last_movement.get(&id).map(|mark| now.saturating_sub(mark.at) as f64 / 1000.0)
    }

    /// Run both checks for an entity in its current zone
    pub fn check(
        &mut self,
        id: EntityId,
        zone: Option<&Zone>,
        now: u64,
    ) -> SmallVec<[AnomalyRecord; 2]> {
        let mut found = SmallVec::new();
        let Some(zone) = zone else {
            return found;
        };

        if zone.zone_type == ZoneType::Desk {
            if let Some(idle_secs) = self.idle_secs(id, now) {
                if idle_secs > self.idle_threshold_secs {
                    info!(entity_id = %id, zone = %zone.name, idle_secs = %idle_secs, "idle_anomaly");
                    found.push(AnomalyRecord::idle_time(id, &zone.name, idle_secs, now));
                }
            }
        }

        if zone.restricted && self.should_report_unauthorized(id, &zone.name, now) {
            info!(entity_id = %id, zone = %zone.name, "unauthorized_access");
            found.push(AnomalyRecord::unauthorized_access(id, &zone.name, now));
        }

        found
    }

    fn should_report_unauthorized(&mut self, id: EntityId, zone: &str, now: u64) -> bool {
        match self.unauthorized {
            UnauthorizedPolicy::EveryCycle => true,
            UnauthorizedPolicy::Cooldown => {
                let key = (id, zone.to_string());
                match self.last_unauthorized.get(&key) {
                    Some(&last) if now.saturating_sub(last) < self.unauthorized_cooldown_ms => false,
                    _ => {
                        self.last_unauthorized.insert(key, now);
                        true
                    }
                }
            }
        }
    }

    /// Drop all state for an evicted entity
    pub fn forget(&mut self, id: EntityId) {
        self.last_movement.remove(&id);
        self.last_unauthorized.retain(|(entity, _), _| *entity != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::anomaly::AnomalyKind;
    use crate::infra::config::ZoneConfig;
    use crate::services::zone_map::ZoneMap;

    fn zone_config(name: &str, zone_type: &str, restricted: bool) -> ZoneConfig {
        ZoneConfig {
            name: name.to_string(),
            zone_type: zone_type.to_string().into(),
            coordinates: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
            max_capacity: None,
            restricted,
        }
    }

    fn zones() -> ZoneMap {
        ZoneMap::from_config(&[
            zone_config("Desk Area 1", "desk", false),
            zone_config("Server Room", "other", true),
            zone_config("Meeting Room 1", "meeting", false),
        ])
        .unwrap()
    }

    fn config() -> Config {
        Config::default().with_idle_threshold_seconds(300.0)
    }

    const P: Point = Point::new(50.0, 50.0);

    #[test]
    fn test_idle_fires_after_threshold() {
        let zones = zones();
        let desk = zones.get("Desk Area 1");
        let mut detector = AnomalyDetector::new(&config());

        detector.record_movement(EntityId(3), P, 0);

        assert!(detector.check(EntityId(3), desk, 300_000).is_empty(), "threshold is exclusive");

        let found = detector.check(EntityId(3), desk, 301_000);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, AnomalyKind::IdleTime);
        assert_eq!(found[0].zone, "Desk Area 1");
        assert_eq!(found[0].duration, Some(301.0));
    }

    #[test]
    fn test_idle_only_in_desk_zones() {
        let zones = zones();
        let mut detector = AnomalyDetector::new(&config());
        detector.record_movement(EntityId(3), P, 0);

        assert!(detector.check(EntityId(3), zones.get("Meeting Room 1"), 1_000_000).is_empty());
    }

    #[test]
    fn test_presence_policy_refreshes_in_zone() {
        let zones = zones();
        let desk = zones.get("Desk Area 1");
        let mut detector = AnomalyDetector::new(&config());

        detector.observe(EntityId(3), desk, P, 0);
        detector.observe(EntityId(3), desk, P, 1_000_000);
        assert!(detector.check(EntityId(3), desk, 1_000_000).is_empty());

        // Outside every zone the mark is left alone
        detector.observe(EntityId(3), None, P, 2_000_000);
        assert_eq!(detector.idle_secs(EntityId(3), 2_000_000), Some(1000.0));
    }

    #[test]
    fn test_displacement_policy_needs_real_motion() {
        let zones = zones();
        let desk = zones.get("Desk Area 1");
        let config = config().with_movement_policy(MovementPolicy::Displacement, 5.0);
        let mut detector = AnomalyDetector::new(&config);

        detector.observe(EntityId(3), desk, P, 0);
        // jitter below the threshold does not count
        detector.observe(EntityId(3), desk, Point::new(52.0, 51.0), 200_000);
        detector.observe(EntityId(3), desk, Point::new(49.0, 48.0), 310_000);

        let found = detector.check(EntityId(3), desk, 310_000);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].duration, Some(310.0));

        detector.observe(EntityId(3), desk, Point::new(60.0, 50.0), 320_000);
        assert!(detector.check(EntityId(3), desk, 320_000).is_empty());
    }

    #[test]
    fn test_unauthorized_every_cycle() {
        let zones = zones();
        let server = zones.get("Server Room");
        let mut detector = AnomalyDetector::new(&config());

        for (cycle, ts) in [0_u64, 1_000, 2_000].into_iter().enumerate() {
            let found = detector.check(EntityId(5), server, ts);
            assert_eq!(found.len(), 1, "cycle {cycle}");
            assert_eq!(found[0].kind, AnomalyKind::UnauthorizedAccess);
            assert_eq!(found[0].zone, "Server Room");
            assert!(found[0].duration.is_none());
        }
    }

    #[test]
    fn test_unauthorized_cooldown() {
        let zones = zones();
        let server = zones.get("Server Room");
        let config = config().with_unauthorized_policy(UnauthorizedPolicy::Cooldown, 60.0);
        let mut detector = AnomalyDetector::new(&config);

        assert_eq!(detector.check(EntityId(5), server, 0).len(), 1);
        assert!(detector.check(EntityId(5), server, 30_000).is_empty());
        assert!(detector.check(EntityId(5), server, 59_999).is_empty());
        assert_eq!(detector.check(EntityId(5), server, 60_000).len(), 1);

        // a different entity has its own cooldown
        assert_eq!(detector.check(EntityId(6), server, 30_000).len(), 1);
    }

    #[test]
    fn test_unzoned_entity_never_flagged() {
        let mut detector = AnomalyDetector::new(&config());
        detector.record_movement(EntityId(1), P, 0);
        assert!(detector.check(EntityId(1), None, 10_000_000).is_empty());
    }

    #[test]
    fn test_forget_clears_entity() {
        let zones = zones();
        let config = config().with_unauthorized_policy(UnauthorizedPolicy::Cooldown, 60.0);
        let mut detector = AnomalyDetector::new(&config);

        detector.record_movement(EntityId(1), P, 0);
        detector.check(EntityId(1), zones.get("Server Room"), 0);
        detector.forget(EntityId(1));

        assert_eq!(detector.idle_secs(EntityId(1), 10), None);
        assert_eq!(detector.check(EntityId(1), zones.get("Server Room"), 1_000).len(), 1);
    }
}
