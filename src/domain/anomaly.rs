//! Anomaly records emitted by the anomaly detector

use crate::domain::types::{new_uuid_v7, EntityId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    IdleTime,
    UnauthorizedAccess,
}

impl AnomalyKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::IdleTime => "idle_time",
            AnomalyKind::UnauthorizedAccess => "unauthorized_access",
        }
    }
}

/// A single anomaly observation
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    /// UUIDv7, unique per record
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub entity_id: EntityId,
    pub zone: String,
    /// Idle duration in seconds (idle_time only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Epoch ms of the cycle that produced the record
    pub ts: u64,
    /// Same instant as `ts`, RFC 3339
    pub timestamp: DateTime<Utc>,
}

impl AnomalyRecord {
    pub fn idle_time(entity_id: EntityId, zone: &str, idle_secs: f64, ts: u64) -> Self {
        Self::new(AnomalyKind::IdleTime, entity_id, zone, Some(idle_secs), ts)
    }

    pub fn unauthorized_access(entity_id: EntityId, zone: &str, ts: u64) -> Self {
        Self::new(AnomalyKind::UnauthorizedAccess, entity_id, zone, None, ts)
    }

    fn new(
        kind: AnomalyKind,
        entity_id: EntityId,
        zone: &str,
        duration: Option<f64>,
        ts: u64,
    ) -> Self {
        let timestamp = i64::try_from(ts)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::UNIX_EPOCH);
        Self { id: new_uuid_v7(), kind, entity_id, zone: zone.to_string(), duration, ts, timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_record_serializes_duration() {
        let record = AnomalyRecord::idle_time(EntityId(3), "Desk Area 1", 301.0, 1_767_617_600_000);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "idle_time");
        assert_eq!(json["entity_id"], 3);
        assert_eq!(json["zone"], "Desk Area 1");
        assert_eq!(json["duration"], 301.0);
        assert_eq!(json["timestamp"], "2026-01-05T12:53:20Z");
    }

    #[test]
    fn test_unauthorized_record_omits_duration() {
        let record = AnomalyRecord::unauthorized_access(EntityId(5), "Server Room", 0);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "unauthorized_access");
        assert!(json.get("duration").is_none());
        assert_eq!(record.id.len(), 36);
    }
}
