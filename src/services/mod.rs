pub mod persistence;

pub use persistence::{flush_rooms, spawn_persistence_scheduler, FlushReport};
