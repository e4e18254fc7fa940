use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::warn;
use uuid::Uuid;

use super::docid::DocId;
use crate::db::{DocStore, StoreError};

/// Frames a client may have queued before it counts as lagging
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Result of queueing one frame for a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    /// The connection is already gone; its handler will leave the room.
    Closed,
    /// The client stopped reading and its queue is full.
    Lagging,
}

/// Outbound side of one client connection.
///
/// The room only keeps this sender; the connection handler owns the socket and the
/// receiving end, so membership never extends the lifetime of the connection.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    id: Uuid,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl ClientHandle {
    pub fn new(id: Uuid, outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self { id, outbound }
    }

    /// Create a handle with a fresh connection id and the receiver its writer drains
    pub fn channel() -> (Self, mpsc::Receiver<Vec<u8>>) {
        Self::with_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(Uuid::new_v4(), tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn deliver(&self, payload: Vec<u8>) -> Delivery {
        match self.outbound.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
            Err(TrySendError::Full(_)) => Delivery::Lagging,
        }
    }
}

struct RoomInner {
    clients: HashMap<Uuid, ClientHandle>,
    state: Vec<u8>,
    version: u64,
}

/// Clients collaborating on one document plus the latest state blob they produced.
///
/// Client set, state and version live behind one mutex, so joins and updates of a
/// room are totally ordered. Flushes are serialised by a second, async lock.
pub struct Room {
    id: DocId,
    inner: Mutex<RoomInner>,
    flush_lock: AsyncMutex<()>,
    flushed_version: AtomicU64,
}

impl Room {
    /// Create a room whose initial state came from the document store (or is empty)
    pub fn new(id: DocId, state: Vec<u8>) -> Self {
        Self {
            id,
            inner: Mutex::new(RoomInner {
                clients: HashMap::new(),
                state,
                version: 0,
            }),
            flush_lock: AsyncMutex::new(()),
            flushed_version: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &DocId {
        &self.id
    }

    // Every mutation leaves RoomInner consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, RoomInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a client to the room.
    ///
    /// A non-empty state is queued to the client before it becomes visible to
    /// broadcasts, so the snapshot always precedes live updates. Returns whether a
    /// snapshot was queued.
    pub fn join(&self, handle: ClientHandle) -> bool {
        let mut inner = self.lock();
        let snapshot_sent =
            !inner.state.is_empty() && handle.deliver(inner.state.clone()) == Delivery::Queued;
        inner.clients.insert(handle.id(), handle);
        snapshot_sent
    }

    /// Replace the state with `payload` and fan it out to every client but `sender`.
    ///
    /// Any binary payload counts, including an empty one. Clients that already
    /// disconnected are skipped. A client whose queue is full is dropped from the
    /// room, which closes its outbound channel and ends its connection. Returns the
    /// number of clients the payload was queued to.
    pub fn apply_update(&self, sender: Uuid, payload: Vec<u8>) -> usize {
        let mut inner = self.lock();
        inner.version += 1;
        let mut delivered = 0;
        let mut lagging = Vec::new();
        for (id, client) in inner.clients.iter() {
            if *id == sender {
                continue;
            }
            match client.deliver(payload.clone()) {
                Delivery::Queued => delivered += 1,
                Delivery::Closed => {}
                Delivery::Lagging => lagging.push(*id),
            }
        }
        for id in lagging {
            inner.clients.remove(&id);
            warn!("Dropping client {} from room {}: outbound queue full", id, self.id);
        }
        inner.state = payload;
        delivered
    }

    /// Remove a client. Returns true if the room is now empty.
    pub fn leave(&self, conn_id: Uuid) -> bool {
        let mut inner = self.lock();
        inner.clients.remove(&conn_id);
        inner.clients.is_empty()
    }

    pub fn snapshot_state(&self) -> Vec<u8> {
        self.lock().state.clone()
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().clients.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Whether updates were applied since the last successful flush
    pub fn is_dirty(&self) -> bool {
        self.version() != self.flushed_version.load(Ordering::SeqCst)
    }

    /// Persist the current state.
    ///
    /// The snapshot is taken after acquiring the flush lock, so concurrent flushes
    /// of one room save monotonically newer states. Returns `Ok(false)` when the room
    /// never held any state.
    pub async fn flush(&self, store: &dyn DocStore) -> Result<bool, StoreError> {
        let _serial = self.flush_lock.lock().await;

        let (state, version) = {
            let inner = self.lock();
            (inner.state.clone(), inner.version)
        };
        if state.is_empty() && version == self.flushed_version.load(Ordering::SeqCst) {
            return Ok(false);
        }

        store.save_state(&self.id, &state).await?;
        self.flushed_version.store(version, Ordering::SeqCst);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FlakyStore;
    use crate::db::MemoryDocStore;

    fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn joining_an_empty_room_sends_no_snapshot() {
        let room = Room::new(DocId::new("doc"), Vec::new());
        let (client, mut rx) = ClientHandle::channel();
        assert!(!room.join(client));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn snapshot_precedes_live_updates() {
        let room = Room::new(DocId::new("doc"), b"stored".to_vec());
        let (writer, _writer_rx) = ClientHandle::channel();
        let writer_id = writer.id();
        room.join(writer);

        let (reader, mut reader_rx) = ClientHandle::channel();
        assert!(room.join(reader));
        room.apply_update(writer_id, b"next".to_vec());

        assert_eq!(drain(&mut reader_rx), vec![b"stored".to_vec(), b"next".to_vec()]);
    }

    #[test]
    fn update_reaches_everyone_but_the_sender() {
        let room = Room::new(DocId::new("doc"), Vec::new());
        let (sender, mut sender_rx) = ClientHandle::channel();
        let sender_id = sender.id();
        room.join(sender);

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (client, rx) = ClientHandle::channel();
            room.join(client);
            receivers.push(rx);
        }

        assert_eq!(room.apply_update(sender_id, b"A".to_vec()), 3);
        for rx in receivers.iter_mut() {
            assert_eq!(drain(rx), vec![b"A".to_vec()]);
        }
        assert!(drain(&mut sender_rx).is_empty());
        assert_eq!(room.snapshot_state(), b"A".to_vec());
    }

    #[test]
    fn disconnected_client_does_not_block_others() {
        let room = Room::new(DocId::new("doc"), Vec::new());
        let (sender, _sender_rx) = ClientHandle::channel();
        let sender_id = sender.id();
        room.join(sender);

        let (gone, gone_rx) = ClientHandle::channel();
        room.join(gone);
        drop(gone_rx);

        let (alive, mut alive_rx) = ClientHandle::channel();
        room.join(alive);

        assert_eq!(room.apply_update(sender_id, b"A".to_vec()), 1);
        assert_eq!(drain(&mut alive_rx), vec![b"A".to_vec()]);
    }

    #[test]
    fn last_update_wins() {
        let room = Room::new(DocId::new("doc"), Vec::new());
        let (a, _a_rx) = ClientHandle::channel();
        let (b, _b_rx) = ClientHandle::channel();
        let (a_id, b_id) = (a.id(), b.id());
        room.join(a);
        room.join(b);

        room.apply_update(a_id, b"from-a".to_vec());
        room.apply_update(b_id, b"from-b".to_vec());
        assert_eq!(room.snapshot_state(), b"from-b".to_vec());
        assert_eq!(room.version(), 2);
    }

    #[test]
    fn empty_frame_replaces_state_and_reaches_peers() {
        let room = Room::new(DocId::new("doc"), b"old".to_vec());
        let (a, _a_rx) = ClientHandle::channel();
        let (b, mut b_rx) = ClientHandle::channel();
        let a_id = a.id();
        room.join(a);
        room.join(b);
        drain(&mut b_rx);

        assert_eq!(room.apply_update(a_id, Vec::new()), 1);
        assert!(room.snapshot_state().is_empty());
        assert!(room.is_dirty());
        assert_eq!(drain(&mut b_rx), vec![Vec::<u8>::new()]);

        // Emptied rooms hand out no snapshot
        let (c, mut c_rx) = ClientHandle::channel();
        assert!(!room.join(c));
        assert!(drain(&mut c_rx).is_empty());
    }

    #[test]
    fn lagging_client_is_dropped_from_room() {
        let room = Room::new(DocId::new("doc"), Vec::new());
        let (sender, _sender_rx) = ClientHandle::channel();
        let sender_id = sender.id();
        room.join(sender);

        let (slow, mut slow_rx) = ClientHandle::with_capacity(2);
        room.join(slow);
        let (fast, mut fast_rx) = ClientHandle::channel();
        room.join(fast);

        assert_eq!(room.apply_update(sender_id, b"1".to_vec()), 2);
        assert_eq!(room.apply_update(sender_id, b"2".to_vec()), 2);
        assert_eq!(room.apply_update(sender_id, b"3".to_vec()), 1);
        assert_eq!(room.client_count(), 2);

        // The queued frames are still readable, then the channel reports closed
        assert_eq!(drain(&mut slow_rx), vec![b"1".to_vec(), b"2".to_vec()]);
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(drain(&mut fast_rx).len(), 3);
    }

    #[test]
    fn leave_reports_when_room_empties() {
        let room = Room::new(DocId::new("doc"), Vec::new());
        let (a, _a_rx) = ClientHandle::channel();
        let (b, _b_rx) = ClientHandle::channel();
        let (a_id, b_id) = (a.id(), b.id());
        room.join(a);
        room.join(b);

        assert!(!room.leave(a_id));
        assert!(room.leave(b_id));
        assert!(room.is_empty());
    }

    #[tokio::test]
    async fn flush_saves_state_and_clears_dirty_flag() {
        let store = MemoryDocStore::new();
        let room = Room::new(DocId::new("doc"), Vec::new());
        assert!(!room.flush(&store).await.unwrap());
        assert_eq!(store.save_count(), 0);

        room.apply_update(Uuid::new_v4(), b"A".to_vec());
        assert!(room.is_dirty());
        assert!(room.flush(&store).await.unwrap());
        assert!(!room.is_dirty());
        assert_eq!(store.get(room.id()).await, Some(b"A".to_vec()));
    }

    #[tokio::test]
    async fn flush_saves_an_emptied_state() {
        let store = MemoryDocStore::new();
        let room = Room::new(DocId::new("doc"), b"A".to_vec());
        room.apply_update(Uuid::new_v4(), Vec::new());

        assert!(room.flush(&store).await.unwrap());
        assert_eq!(store.get(room.id()).await, Some(Vec::new()));
        assert!(!room.is_dirty());
        assert!(!room.flush(&store).await.unwrap());
    }

    #[tokio::test]
    async fn failed_flush_keeps_room_dirty() {
        let room = Room::new(DocId::new("doc"), Vec::new());
        room.apply_update(Uuid::new_v4(), b"A".to_vec());
        assert!(room.flush(&FlakyStore::failing_saves()).await.is_err());
        assert!(room.is_dirty());
    }
}
