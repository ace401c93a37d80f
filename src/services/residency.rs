//! Per-entity zone residency state machine
//!
//! Each tracked entity is in one of three states:
//! - untracked (not in the map)
//! - in a zone (has an open residency interval)
//! - unzoned (detected, but outside every configured polygon)
//!
//! Key behaviors:
//! - A zone change closes the open interval (if any) and opens a new one (if any)
//! - Open intervals are indexed by entity, so at most one exists per entity
//! - Entities missing from a batch are evicted immediately, no grace period
//! - Eviction hands back the open interval unclosed; the caller decides its fate

use crate::domain::types::{EntityId, Point, ZoneResidencyInterval};
use crate::services::zone_map::ZoneMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Tracked entity state
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub id: EntityId,
    /// Name of the zone the entity is in, None when unzoned
    pub current_zone: Option<String>,
    /// When the current zone residency began (epoch ms)
    pub entry_time: Option<u64>,
    /// Epoch ms of the last batch that contained this entity
    pub last_seen: u64,
    pub last_position: Point,
}

/// Residency state of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResidencyState {
    Untracked,
    InZone(String),
    Unzoned,
}

/// Outcome of observing one entity in one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// First time this id was seen
    pub created: bool,
    /// Interval closed by this observation
    pub closed: Option<ZoneResidencyInterval>,
    /// Interval opened by this observation
    pub opened: Option<ZoneResidencyInterval>,
}

impl Transition {
    #[inline]
    pub fn zone_changed(&self) -> bool {
        self.closed.is_some() || self.opened.is_some()
    }
}

/// An entity removed for being absent from a batch
#[derive(Debug, Clone, PartialEq)]
pub struct Eviction {
    pub entity: TrackedEntity,
    /// Open interval the entity still held, never closed by the tracker
    pub orphaned: Option<ZoneResidencyInterval>,
}

/// Tracks which zone every detected entity occupies
pub struct ResidencyTracker {
    zone_map: Arc<ZoneMap>,
    entities: FxHashMap<EntityId, TrackedEntity>,
    /// entity -> its open interval
    open_intervals: FxHashMap<EntityId, ZoneResidencyInterval>,
}

impl ResidencyTracker {
    pub fn new(zone_map: Arc<ZoneMap>) -> Self {
        Self { zone_map, entities: FxHashMap::default(), open_intervals: FxHashMap::default() }
    }

    /// Apply one detection of an entity at `position`
    ///
    /// Closes at most one interval and opens at most one.
    pub fn observe(&mut self, id: EntityId, position: Point, now: u64) -> Transition {
        let new_zone = self.zone_map.zone_at(position).map(|zone| zone.name.as_str());

        let mut transition = Transition::default();
        let entity = self.entities.entry(id).or_insert_with(|| {
            transition.created = true;
            TrackedEntity {
                id,
                current_zone: None,
                entry_time: None,
                last_seen: now,
                last_position: position,
            }
        });

        if entity.current_zone.as_deref() != new_zone {
            if let Some(open) = self.open_intervals.remove(&id) {
                transition.closed = Some(open.close(now));
            }

            match new_zone {
                Some(zone) => {
                    let interval = ZoneResidencyInterval::open(id, zone, now);
                    self.open_intervals.insert(id, interval.clone());
                    transition.opened = Some(interval);
                    entity.current_zone = Some(zone.to_string());
                    entity.entry_time = Some(now);
                }
                None => {
                    entity.current_zone = None;
                    entity.entry_time = None;
                }
            }

            debug!(
                entity_id = %id,
                from = ?transition.closed.as_ref().map(|i| i.zone_name.as_str()),
                to = ?new_zone,
                "zone_transition"
            );
        }

        entity.last_seen = now;
        entity.last_position = position;
        transition
    }

    /// Remove every entity not in `present`
    pub fn evict_absent(&mut self, present: &FxHashSet<EntityId>) -> Vec<Eviction> {
        let stale: Vec<EntityId> =
            self.entities.keys().filter(|id| !present.contains(id)).copied().collect();

        let mut evictions = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(entity) = self.entities.remove(&id) {
                let orphaned = self.open_intervals.remove(&id);
                evictions.push(Eviction { entity, orphaned });
            }
        }
        // Stable order for logging and tests
        evictions.sort_by_key(|e| e.entity.id);
        evictions
    }

    /// Current residency state of an entity
    pub fn state(&self, id: EntityId) -> ResidencyState {
        match self.entities.get(&id) {
            None => ResidencyState::Untracked,
            Some(TrackedEntity { current_zone: Some(zone), .. }) => {
                ResidencyState::InZone(zone.clone())
            }
            Some(_) => ResidencyState::Unzoned,
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&TrackedEntity> {
        self.entities.get(&id)
    }

    pub fn open_intervals(&self) -> impl Iterator<Item = &ZoneResidencyInterval> {
        self.open_intervals.values()
    }

    /// Current occupants of every configured zone (empty sets included)
    pub fn zone_occupancy(&self) -> BTreeMap<String, BTreeSet<EntityId>> {
        let mut occupancy: BTreeMap<String, BTreeSet<EntityId>> =
            self.zone_map.zones().iter().map(|zone| (zone.name.clone(), BTreeSet::new())).collect();
        for interval in self.open_intervals.values() {
            occupancy.entry(interval.zone_name.clone()).or_default().insert(interval.entity_id);
        }
        occupancy
    }

    /// Number of open intervals per zone (every configured zone present)
    pub fn current_occupancy(&self) -> BTreeMap<String, usize> {
        self.zone_occupancy().into_iter().map(|(zone, ids)| (zone, ids.len())).collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.entities.len()
    }
}
