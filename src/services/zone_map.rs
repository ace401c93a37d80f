//! Static zone geometry: which zone contains a point
//!
//! Zones are loaded once from configuration and never mutated, so a
//! `ZoneMap` can be shared across threads behind an `Arc` without locking.
//!
//! Lookup is first-match in configuration order. Overlapping polygons are
//! allowed; the zone listed first wins, every time.

use crate::domain::types::{Point, ZoneType};
use crate::infra::config::{validate_zones, ConfigError, ZoneConfig};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Tolerance for treating a point as lying on a polygon edge (pixels)
const EDGE_EPSILON: f64 = 1e-9;

/// A named polygonal zone
#[derive(Debug, Clone)]
pub struct Zone {
    pub name: String,
    pub zone_type: ZoneType,
    pub polygon: SmallVec<[Point; 8]>,
    pub max_capacity: Option<u32>,
    pub restricted: bool,
    /// Axis-aligned bounds (min, max) for quick rejection
    bounds: (Point, Point),
}

impl Zone {
    fn from_config(config: &ZoneConfig) -> Self {
        let polygon: SmallVec<[Point; 8]> =
            config.coordinates.iter().map(|&[x, y]| Point::new(x, y)).collect();

        let mut min = Point::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &polygon {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }

        Self {
            name: config.name.clone(),
            zone_type: config.zone_type,
            polygon,
            max_capacity: config.max_capacity,
            restricted: config.restricted,
            bounds: (min, max),
        }
    }

    /// Point-in-polygon test, boundary inclusive
    ///
    /// Edges are checked first so points on the outline always count as
    /// inside; the interior uses even-odd ray casting.
    pub fn contains(&self, p: Point) -> bool {
        let (min, max) = self.bounds;
        if p.x < min.x || p.x > max.x || p.y < min.y || p.y > max.y {
            return false;
        }

        let n = self.polygon.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.polygon[i];
            let b = self.polygon[j];

            if on_segment(p, a, b) {
                return true;
            }

            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let len = a.distance_to(&b);
    if cross.abs() > EDGE_EPSILON * len.max(1.0) {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

/// Immutable set of zones in configuration order
#[derive(Debug, Clone)]
pub struct ZoneMap {
    zones: Vec<Zone>,
    index_by_name: FxHashMap<String, usize>,
}

impl ZoneMap {
    /// Build from validated zone configuration
    pub fn from_config(zones: &[ZoneConfig]) -> Result<Self, ConfigError> {
        validate_zones(zones)?;

        let zones: Vec<Zone> = zones.iter().map(Zone::from_config).collect();
        let index_by_name =
            zones.iter().enumerate().map(|(i, zone)| (zone.name.clone(), i)).collect();

        Ok(Self { zones, index_by_name })
    }

    /// First zone (in configuration order) whose polygon contains the point
    pub fn zone_at(&self, point: Point) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.contains(point))
    }

    /// Look up a zone by name
    pub fn get(&self, name: &str) -> Option<&Zone> {
        self.index_by_name.get(name).map(|&i| &self.zones[i])
    }

    /// All zones in configuration order
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str, zone_type: &str, coordinates: Vec<[f64; 2]>) -> ZoneConfig {
        ZoneConfig {
            name: name.to_string(),
            zone_type: zone_type.to_string().into(),
            coordinates,
            max_capacity: None,
            restricted: false,
        }
    }

    fn square(name: &str, x: f64, y: f64, size: f64) -> ZoneConfig {
        zone(name, "desk", vec![[x, y], [x + size, y], [x + size, y + size], [x, y + size]])
    }

    #[test]
    fn test_point_inside_and_outside() {
        let map = ZoneMap::from_config(&[square("Desk Area 1", 0.0, 0.0, 100.0)]).unwrap();

        assert_eq!(map.zone_at(Point::new(50.0, 50.0)).unwrap().name, "Desk Area 1");
        assert!(map.zone_at(Point::new(150.0, 50.0)).is_none());
        assert!(map.zone_at(Point::new(-0.1, 50.0)).is_none());
    }

    #[test]
    fn test_boundary_inclusive() {
        let map = ZoneMap::from_config(&[square("Desk Area 1", 0.0, 0.0, 100.0)]).unwrap();

        // edges and corners
        assert!(map.zone_at(Point::new(0.0, 50.0)).is_some());
        assert!(map.zone_at(Point::new(100.0, 50.0)).is_some());
        assert!(map.zone_at(Point::new(50.0, 100.0)).is_some());
        assert!(map.zone_at(Point::new(0.0, 0.0)).is_some());
        assert!(map.zone_at(Point::new(100.0, 100.0)).is_some());
    }

    #[test]
    fn test_concave_polygon() {
        // L-shape: notch cut out of the top-right quadrant
        let l_shape = zone(
            "Break Area 1",
            "break",
            vec![[0.0, 0.0], [50.0, 0.0], [50.0, 50.0], [100.0, 50.0], [100.0, 100.0], [0.0, 100.0]],
        );
        let map = ZoneMap::from_config(&[l_shape]).unwrap();

        assert!(map.zone_at(Point::new(25.0, 25.0)).is_some());
        assert!(map.zone_at(Point::new(75.0, 75.0)).is_some());
        assert!(map.zone_at(Point::new(75.0, 25.0)).is_none());
    }

    #[test]
    fn test_overlap_first_configured_wins() {
        let map = ZoneMap::from_config(&[
            square("Meeting Room 1", 0.0, 0.0, 100.0),
            square("Desk Area 1", 50.0, 50.0, 100.0),
        ])
        .unwrap();

        let p = Point::new(75.0, 75.0);
        for _ in 0..10 {
            assert_eq!(map.zone_at(p).unwrap().name, "Meeting Room 1");
        }
        assert_eq!(map.zone_at(Point::new(140.0, 140.0)).unwrap().name, "Desk Area 1");
    }

    #[test]
    fn test_shared_edge_goes_to_first_zone() {
        let map = ZoneMap::from_config(&[
            square("Desk Area 1", 0.0, 0.0, 100.0),
            square("Desk Area 2", 100.0, 0.0, 100.0),
        ])
        .unwrap();

        assert_eq!(map.zone_at(Point::new(100.0, 50.0)).unwrap().name, "Desk Area 1");
    }

    #[test]
    fn test_zone_at_idempotent() {
        let map = ZoneMap::from_config(&[square("Desk Area 1", 0.0, 0.0, 100.0)]).unwrap();
        let p = Point::new(33.3, 66.6);
        let first = map.zone_at(p).map(|z| z.name.clone());
        let second = map.zone_at(p).map(|z| z.name.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn test_get_by_name() {
        let map = ZoneMap::from_config(&[square("Desk Area 1", 0.0, 0.0, 100.0)]).unwrap();
        assert_eq!(map.get("Desk Area 1").unwrap().zone_type, ZoneType::Desk);
        assert!(map.get("Nowhere").is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(ZoneMap::from_config(&[]), Err(ConfigError::NoZones)));
    }
}
