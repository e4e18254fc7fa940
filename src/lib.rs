//! Real-time relay for collaborative documents.
//!
//! Clients editing the same document connect over WebSocket (the request path names
//! the document) and exchange opaque binary update blobs through a shared room.
//! The latest blob of every room is checkpointed to a [`db::DocStore`] periodically
//! and whenever the last client leaves.

pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;
pub mod services;
pub mod utils;
pub mod websocket;
pub mod ws;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use crate::ws::RoomRegistry;

/// State shared by every request handler
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub shutdown: watch::Receiver<bool>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<RoomRegistry>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            registry,
            shutdown,
            started_at: Utc::now(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
