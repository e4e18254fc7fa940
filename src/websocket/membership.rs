use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::error;
use uuid::Uuid;

use crate::ws::{Room, RoomRegistry};

/// A client's seat in a room.
///
/// `leave()` runs the departure path inline. If the guard is dropped before that
/// finished (the connection task was cancelled), the departure is spawned onto the
/// runtime instead, so a client never stays joined once its connection is gone.
pub struct RoomMembership {
    registry: Arc<RoomRegistry>,
    room: Arc<Room>,
    conn_id: Uuid,
    joined: bool,
}

impl RoomMembership {
    pub fn new(registry: Arc<RoomRegistry>, room: Arc<Room>, conn_id: Uuid) -> Self {
        Self {
            registry,
            room,
            conn_id,
            joined: true,
        }
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Leave the room; the last client out flushes and removes it.
    pub async fn leave(mut self) {
        self.registry.leave(&self.room, self.conn_id).await;
        self.joined = false;
    }
}

impl Drop for RoomMembership {
    fn drop(&mut self) {
        if !self.joined {
            return;
        }

        let registry = self.registry.clone();
        let room = self.room.clone();
        let conn_id = self.conn_id;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    registry.leave(&room, conn_id).await;
                });
            }
            Err(_) => {
                room.leave(conn_id);
                error!(
                    "No runtime left to flush room {} after client {} dropped out",
                    room.id(),
                    conn_id
                );
            }
        }
    }
}
