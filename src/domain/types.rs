//! Shared types for the space monitor

use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Newtype wrapper for detector-assigned entity IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(pub i64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Screen-space point (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    #[inline]
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned bounding box (x1, y1) top-left, (x2, y2) bottom-right
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box center, or None if the box is non-finite or inverted
    pub fn center(&self) -> Option<Point> {
        let finite = [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite());
        if !finite || self.x2 < self.x1 || self.y2 < self.y1 {
            return None;
        }
        Some(Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0))
    }
}

/// Where the detector located an entity in the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Locator {
    Box(BoundingBox),
    Center(Point),
    /// Entity reported without a bbox or center
    Missing,
}

/// A single entity reported by the detector in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub entity_id: EntityId,
    pub locator: Locator,
}

impl Detection {
    pub fn with_box(entity_id: i64, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { entity_id: EntityId(entity_id), locator: Locator::Box(BoundingBox::new(x1, y1, x2, y2)) }
    }

    pub fn at(entity_id: i64, x: f64, y: f64) -> Self {
        Self { entity_id: EntityId(entity_id), locator: Locator::Center(Point::new(x, y)) }
    }

    /// Position used for zone lookup (bbox center), None if malformed
    pub fn position(&self) -> Option<Point> {
        match self.locator {
            Locator::Box(bbox) => bbox.center(),
            Locator::Center(p) if p.is_finite() => Some(p),
            Locator::Center(_) | Locator::Missing => None,
        }
    }
}

/// All detections of one detector cycle
#[derive(Debug, Clone, Default)]
pub struct DetectionBatch {
    /// Cycle timestamp (epoch ms)
    pub ts: u64,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(ts: u64, detections: Vec<Detection>) -> Self {
        Self { ts, detections }
    }

    /// A cycle in which the detector saw nobody
    pub fn empty(ts: u64) -> Self {
        Self { ts, detections: Vec::new() }
    }
}

/// Detection message as published by the detector
#[derive(Debug, Deserialize)]
pub struct DetectionMessage {
    /// Timestamp - can be ISO 8601 string or epoch milliseconds integer
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub ts: TimestampValue,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

/// Wire form of a detection: either `bbox` or `center` is expected
#[derive(Debug, Deserialize)]
pub struct RawDetection {
    pub id: i64,
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub center: Option<[f64; 2]>,
}

impl RawDetection {
    /// Convert to a detection, preferring the bbox when both are present
    ///
    /// An entry with neither keeps its id so the entity still counts as seen.
    pub fn into_detection(self) -> Detection {
        let locator = match (self.bbox, self.center) {
            (Some([x1, y1, x2, y2]), _) => Locator::Box(BoundingBox::new(x1, y1, x2, y2)),
            (None, Some([x, y])) => Locator::Center(Point::new(x, y)),
            (None, None) => Locator::Missing,
        };
        Detection { entity_id: EntityId(self.id), locator }
    }
}

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            let epoch_ms = u64::try_from(value).unwrap_or(0);
            Ok(TimestampValue::EpochMs(epoch_ms))
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Zone classification used for hours accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ZoneType {
    Desk,
    Meeting,
    Break,
    Other,
}

impl std::str::FromStr for ZoneType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "desk" | "productive" => ZoneType::Desk,
            "meeting" | "collaborative" => ZoneType::Meeting,
            "break" => ZoneType::Break,
            _ => ZoneType::Other,
        })
    }
}

impl From<String> for ZoneType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl From<ZoneType> for String {
    fn from(t: ZoneType) -> Self {
        t.as_str().to_string()
    }
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Desk => "desk",
            ZoneType::Meeting => "meeting",
            ZoneType::Break => "break",
            ZoneType::Other => "other",
        }
    }
}

/// One entity's stay in one zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneResidencyInterval {
    pub entity_id: EntityId,
    pub zone_name: String,
    /// Epoch ms
    pub start_time: u64,
    /// Epoch ms, None while the entity is still in the zone
    pub end_time: Option<u64>,
}

impl ZoneResidencyInterval {
    pub fn open(entity_id: EntityId, zone_name: &str, start_time: u64) -> Self {
        Self { entity_id, zone_name: zone_name.to_string(), start_time, end_time: None }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Close the interval. The end time is clamped so duration is never negative.
    pub fn close(mut self, end_time: u64) -> Self {
        self.end_time = Some(end_time.max(self.start_time));
        self
    }

    /// Duration in seconds, None while open
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time.map(|end| end.saturating_sub(self.start_time) as f64 / 1000.0)
    }
}
