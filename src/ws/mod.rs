pub mod docid;
pub mod registry;
pub mod room;

pub use docid::{DocId, DEFAULT_DOC_ID};
pub use registry::RoomRegistry;
pub use room::{ClientHandle, Room};
