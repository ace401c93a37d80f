//! Snapshot egress - appends published snapshots to a file
//!
//! Snapshots are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::snapshot::AnalyticsSnapshot;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Egress writer for snapshots
pub struct SnapshotEgress {
    file_path: String,
}

impl SnapshotEgress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a snapshot to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_snapshot(&self, snapshot: &AnalyticsSnapshot) -> bool {
        match self.append_line(&snapshot.to_json()) {
            Ok(()) => {
                debug!(cycle = %snapshot.cycle, ts = %snapshot.ts, "snapshot_egressed");
                true
            }
            Err(e) => {
                error!(cycle = %snapshot.cycle, error = %e, "snapshot_egress_failed");
                false
            }
        }
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn snapshot(cycle: u64) -> AnalyticsSnapshot {
        let mut snapshot =
            AnalyticsSnapshot { site: "office".to_string(), ts: 1_000 * cycle, cycle, ..Default::default() };
        snapshot.metrics.productive_hours.insert("Desk Area 1".to_string(), 1.5);
        snapshot.heatmap.current_occupancy.insert("Desk Area 1".to_string(), 2);
        snapshot
    }

    #[test]
    fn test_write_snapshot() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("snapshots.jsonl");
        let egress = SnapshotEgress::new(file_path.to_str().unwrap());

        assert!(egress.write_snapshot(&snapshot(1)));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["site"], "office");
        assert_eq!(parsed["cycle"], 1);
        assert_eq!(parsed["metrics"]["productive_hours"]["Desk Area 1"], 1.5);
        assert_eq!(parsed["heatmap"]["current_occupancy"]["Desk Area 1"], 2);
    }

    #[test]
    fn test_snapshots_appended_one_per_line() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("snapshots.jsonl");
        let egress = SnapshotEgress::new(file_path.to_str().unwrap());

        for cycle in 1..=3 {
            assert!(egress.write_snapshot(&snapshot(cycle)));
        }

        let content = fs::read_to_string(&file_path).unwrap();
        let cycles: Vec<u64> = content
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["cycle"].as_u64().unwrap())
            .collect();
        assert_eq!(cycles, vec![1, 2, 3]);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("nested/deeper/snapshots.jsonl");
        let egress = SnapshotEgress::new(file_path.to_str().unwrap());

        assert!(egress.write_snapshot(&snapshot(1)));
        assert!(file_path.exists());
    }

    #[test]
    fn test_unwritable_path_reports_failure() {
        let dir = tempdir().unwrap();
        // a directory cannot be opened for append
        let egress = SnapshotEgress::new(dir.path().to_str().unwrap());
        assert!(!egress.write_snapshot(&snapshot(1)));
    }
}
