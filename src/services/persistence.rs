use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::utils::shutdown_requested;
use crate::ws::RoomRegistry;

/// Outcome of one persistence pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
    pub reaped: usize,
}

/// Flush every registered room holding state, then drop the ones nobody uses.
///
/// A failing room is logged and skipped; the remaining rooms are still flushed.
pub async fn flush_rooms(registry: &RoomRegistry) -> FlushReport {
    let mut report = FlushReport::default();

    for room in registry.rooms() {
        match room.flush(registry.store().as_ref()).await {
            Ok(true) => report.flushed += 1,
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to persist room {}: {}", room.id(), e);
                report.failed += 1;
            }
        }

        // Rooms whose departure flush failed earlier are removed once saved
        if room.is_empty() && registry.remove_if_empty(room.id()).await {
            report.reaped += 1;
        }
    }

    report
}

/// Start the background task that periodically persists all rooms.
///
/// The task stops when shutdown is requested, after one last pass over the rooms
/// still registered. Flushes run outside the cancellable wait, so stopping never
/// interrupts a save.
pub fn spawn_persistence_scheduler(
    registry: Arc<RoomRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Persistence scheduler started (every {:?})", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = flush_rooms(&registry).await;
                    debug!(
                        "Persistence tick: {} flushed, {} failed, {} reaped",
                        report.flushed, report.failed, report.reaped
                    );
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        let report = flush_rooms(&registry).await;
        info!(
            "Persistence scheduler stopped after final flush: {} flushed, {} failed",
            report.flushed, report.failed
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FlakyStore;
    use crate::db::{DocStore, MemoryDocStore};
    use crate::utils::shutdown_channel;
    use crate::ws::{ClientHandle, DocId};
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc::Receiver;
    use uuid::Uuid;

    async fn seeded_room(
        registry: &RoomRegistry,
        id: &str,
        state: &[u8],
    ) -> (ClientHandle, Receiver<Vec<u8>>) {
        let (client, rx) = ClientHandle::channel();
        let (room, _) = registry.join(&DocId::new(id), client.clone()).await.unwrap();
        room.apply_update(Uuid::new_v4(), state.to_vec());
        (client, rx)
    }

    #[tokio::test]
    async fn tick_flushes_rooms_with_state_only() {
        let store = Arc::new(MemoryDocStore::new());
        let registry = RoomRegistry::new(store.clone());
        let _a = seeded_room(&registry, "a", b"A").await;
        let (idle, _idle_rx) = ClientHandle::channel();
        registry.join(&DocId::new("blank"), idle).await.unwrap();

        let report = flush_rooms(&registry).await;
        assert_eq!(report, FlushReport { flushed: 1, failed: 0, reaped: 0 });
        assert_eq!(store.get(&DocId::new("a")).await, Some(b"A".to_vec()));
        assert!(store.get(&DocId::new("blank")).await.is_none());
    }

    #[tokio::test]
    async fn one_failing_room_does_not_stop_the_others() {
        let store = Arc::new(FlakyStore::failing_saves_for("broken"));
        let registry = RoomRegistry::new(store.clone());
        let _broken = seeded_room(&registry, "broken", b"X").await;
        let _healthy = seeded_room(&registry, "healthy", b"H").await;

        let report = flush_rooms(&registry).await;
        assert_eq!(report.flushed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.inner.get(&DocId::new("healthy")).await, Some(b"H".to_vec()));
        assert!(store.inner.get(&DocId::new("broken")).await.is_none());
    }

    #[tokio::test]
    async fn repeated_ticks_store_the_same_state() {
        let store = Arc::new(MemoryDocStore::new());
        let registry = RoomRegistry::new(store.clone());
        let _doc = seeded_room(&registry, "doc", b"stable").await;

        flush_rooms(&registry).await;
        let first = store.load_state(&DocId::new("doc")).await.unwrap();
        flush_rooms(&registry).await;
        flush_rooms(&registry).await;

        assert_eq!(store.load_state(&DocId::new("doc")).await.unwrap(), first);
        assert_eq!(first, Some(b"stable".to_vec()));
    }

    #[tokio::test]
    async fn tick_reaps_empty_room_once_saved() {
        let store = Arc::new(FlakyStore::failing_saves());
        let registry = RoomRegistry::new(store.clone());
        let (client, _rx) = ClientHandle::channel();
        let conn_id = client.id();
        let (room, _) = registry.join(&DocId::new("doc"), client).await.unwrap();
        room.apply_update(conn_id, b"A".to_vec());
        registry.leave(&room, conn_id).await;
        assert_eq!(registry.room_count(), 1);

        store.fail_saves.store(false, Ordering::SeqCst);
        let report = flush_rooms(&registry).await;
        assert_eq!(report, FlushReport { flushed: 1, failed: 0, reaped: 1 });
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn scheduler_flushes_periodically_and_drains_on_shutdown() {
        let store = Arc::new(MemoryDocStore::new());
        let registry = Arc::new(RoomRegistry::new(store.clone()));
        let (client, _rx) = seeded_room(&registry, "doc", b"v1").await;
        let (stop, stop_rx) = shutdown_channel();

        let scheduler =
            spawn_persistence_scheduler(registry.clone(), Duration::from_millis(20), stop_rx);

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.get(&DocId::new("doc")).await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("a tick should have flushed the room");

        registry
            .get(&DocId::new("doc"))
            .unwrap()
            .apply_update(client.id(), b"v2".to_vec());
        stop.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), scheduler)
            .await
            .expect("scheduler should stop")
            .unwrap();

        assert_eq!(store.get(&DocId::new("doc")).await, Some(b"v2".to_vec()));
    }
}
