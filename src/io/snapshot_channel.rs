//! Latest-value channel between the engine and its readers
//!
//! The engine replaces the snapshot after every cycle; publishers and the
//! HTTP API read whichever copy is current. Readers never block the engine
//! and never see a half-updated cycle.

use crate::domain::snapshot::AnalyticsSnapshot;
use std::sync::Arc;
use tokio::sync::watch;

/// Engine-side handle
pub struct SnapshotSender {
    tx: watch::Sender<Arc<AnalyticsSnapshot>>,
}

impl SnapshotSender {
    /// Replace the current snapshot
    pub fn publish(&self, snapshot: AnalyticsSnapshot) {
        self.tx.send_replace(Arc::new(snapshot));
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        SnapshotReceiver { rx: self.tx.subscribe() }
    }
}

/// Reader handle, cheap to clone
#[derive(Clone)]
pub struct SnapshotReceiver {
    rx: watch::Receiver<Arc<AnalyticsSnapshot>>,
}

impl SnapshotReceiver {
    /// Current snapshot (shared, never mutated after publish)
    pub fn latest(&self) -> Arc<AnalyticsSnapshot> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish. Returns false once the engine is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Create a snapshot channel seeded with an empty snapshot for `site_id`
pub fn create_snapshot_channel(site_id: &str) -> (SnapshotSender, SnapshotReceiver) {
    let initial = AnalyticsSnapshot { site: site_id.to_string(), ..Default::default() };
    let (tx, rx) = watch::channel(Arc::new(initial));
    (SnapshotSender { tx }, SnapshotReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot_has_site() {
        let (_tx, rx) = create_snapshot_channel("office");
        let snapshot = rx.latest();
        assert_eq!(snapshot.site, "office");
        assert_eq!(snapshot.cycle, 0);
    }

    #[test]
    fn test_publish_replaces_latest() {
        let (tx, rx) = create_snapshot_channel("office");
        let held = rx.latest();

        tx.publish(AnalyticsSnapshot { site: "office".to_string(), cycle: 7, ..Default::default() });

        assert_eq!(rx.latest().cycle, 7);
        // previously obtained copies are untouched
        assert_eq!(held.cycle, 0);
    }

    #[tokio::test]
    async fn test_changed_wakes_reader() {
        let (tx, mut rx) = create_snapshot_channel("office");
        tx.publish(AnalyticsSnapshot { cycle: 1, ..Default::default() });
        assert!(rx.changed().await);
        assert_eq!(rx.latest().cycle, 1);

        drop(tx);
        assert!(!rx.changed().await);
    }
}
