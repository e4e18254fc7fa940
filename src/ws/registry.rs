use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::docid::DocId;
use super::room::{ClientHandle, Room};
use crate::db::{DocStore, StoreError};

type DocLock = Arc<AsyncMutex<()>>;

/// Proof that the caller holds the per-document lock of one id
struct DocGuard {
    lock: DocLock,
    _held: OwnedMutexGuard<()>,
}

/// Live rooms keyed by document id.
///
/// Creating and removing the room of a document happens under a lock that is
/// private to that document id, so two rooms never coexist for the same id and a
/// join can never attach to a room that is being torn down. Traffic inside a room
/// does not touch these locks.
pub struct RoomRegistry {
    store: Arc<dyn DocStore>,
    locks: Mutex<HashMap<DocId, DocLock>>,
    rooms: Mutex<HashMap<DocId, Arc<Room>>>,
    room_count: watch::Sender<usize>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn DocStore>) -> Self {
        let (room_count, _) = watch::channel(0);
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            room_count,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocStore> {
        &self.store
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<DocId, DocLock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rooms_map(&self) -> MutexGuard<'_, HashMap<DocId, Arc<Room>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lock_doc(&self, doc_id: &DocId) -> DocGuard {
        loop {
            let lock = self
                .locks()
                .entry(doc_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone();
            let held = lock.clone().lock_owned().await;

            // The lock may have been retired while we were waiting for it
            let current = self
                .locks()
                .get(doc_id)
                .is_some_and(|registered| Arc::ptr_eq(registered, &lock));
            if current {
                return DocGuard { lock, _held: held };
            }
        }
    }

    /// Retire the lock of a document that no longer has a room.
    fn vacate(&self, doc_id: &DocId, guard: &DocGuard) {
        let mut locks = self.locks();
        if locks
            .get(doc_id)
            .is_some_and(|registered| Arc::ptr_eq(registered, &guard.lock))
        {
            locks.remove(doc_id);
        }
    }

    fn lookup(&self, doc_id: &DocId) -> Option<Arc<Room>> {
        self.rooms_map().get(doc_id).cloned()
    }

    fn publish(&self, room: Arc<Room>) {
        let mut rooms = self.rooms_map();
        rooms.insert(room.id().clone(), room);
        self.room_count.send_replace(rooms.len());
    }

    fn unpublish(&self, doc_id: &DocId) -> Option<Arc<Room>> {
        let mut rooms = self.rooms_map();
        let removed = rooms.remove(doc_id);
        self.room_count.send_replace(rooms.len());
        removed
    }

    async fn ensure_room(&self, doc_id: &DocId, guard: &DocGuard) -> Result<Arc<Room>, StoreError> {
        if let Some(room) = self.lookup(doc_id) {
            return Ok(room);
        }

        match self.store.load_state(doc_id).await {
            Ok(state) => {
                let state = state.unwrap_or_default();
                info!("Room {} created ({} bytes loaded from store)", doc_id, state.len());
                let room = Arc::new(Room::new(doc_id.clone(), state));
                self.publish(room.clone());
                Ok(room)
            }
            Err(e) => {
                error!("Failed to load document {}: {}", doc_id, e);
                self.vacate(doc_id, guard);
                Err(e)
            }
        }
    }

    /// Fetch the room of `doc_id`, creating it from the stored state if needed.
    pub async fn get_or_create(&self, doc_id: &DocId) -> Result<Arc<Room>, StoreError> {
        let guard = self.lock_doc(doc_id).await;
        self.ensure_room(doc_id, &guard).await
    }

    /// Attach a client to the room of `doc_id`, creating the room if needed.
    ///
    /// Returns the room and whether an initial snapshot was queued to the client.
    pub async fn join(
        &self,
        doc_id: &DocId,
        handle: ClientHandle,
    ) -> Result<(Arc<Room>, bool), StoreError> {
        let guard = self.lock_doc(doc_id).await;
        let room = self.ensure_room(doc_id, &guard).await?;
        let conn_id = handle.id();
        let snapshot_sent = room.join(handle);
        info!(
            "Client {} joined room {} ({} clients, snapshot sent: {})",
            conn_id,
            doc_id,
            room.client_count(),
            snapshot_sent
        );
        Ok((room, snapshot_sent))
    }

    /// Detach a client. The last client out flushes the room and removes it.
    ///
    /// If that flush fails the room stays registered; the persistence scheduler
    /// retries the flush and removes the room afterwards.
    pub async fn leave(&self, room: &Arc<Room>, conn_id: Uuid) {
        let doc_id = room.id().clone();
        let guard = self.lock_doc(&doc_id).await;

        let now_empty = room.leave(conn_id);
        info!("Client {} left room {}", conn_id, doc_id);
        // A room already replaced by a newer one is not ours to remove
        let registered = self
            .lookup(&doc_id)
            .is_some_and(|current| Arc::ptr_eq(&current, room));
        if !now_empty || !registered {
            return;
        }

        match room.flush(self.store.as_ref()).await {
            Ok(flushed) => {
                if flushed {
                    info!("Room {} flushed after last client left", doc_id);
                }
                self.remove_locked(&doc_id, &guard);
            }
            Err(e) => {
                warn!(
                    "Failed to flush room {} after last client left, keeping it for the next persistence tick: {}",
                    doc_id, e
                );
            }
        }
    }

    /// Remove the room of `doc_id` if it has no clients and no unsaved state.
    pub async fn remove_if_empty(&self, doc_id: &DocId) -> bool {
        let guard = self.lock_doc(doc_id).await;
        self.remove_locked(doc_id, &guard)
    }

    fn remove_locked(&self, doc_id: &DocId, guard: &DocGuard) -> bool {
        let removable = match self.lookup(doc_id) {
            Some(room) => room.is_empty() && !room.is_dirty(),
            None => {
                self.vacate(doc_id, guard);
                return false;
            }
        };
        if !removable {
            return false;
        }

        self.unpublish(doc_id);
        self.vacate(doc_id, guard);
        info!("Room {} removed", doc_id);
        true
    }

    /// Point-in-time list of the registered rooms
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms_map().values().cloned().collect()
    }

    pub fn get(&self, doc_id: &DocId) -> Option<Arc<Room>> {
        self.lookup(doc_id)
    }

    pub fn room_count(&self) -> usize {
        *self.room_count.borrow()
    }

    pub fn connection_count(&self) -> usize {
        self.rooms().iter().map(|room| room.client_count()).sum()
    }

    /// Resolve once no room is registered
    pub async fn wait_until_empty(&self) {
        let mut count = self.room_count.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = count.wait_for(|rooms| *rooms == 0).await;
    }
}
