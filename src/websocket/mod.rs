pub mod handler;
pub mod membership;

pub use handler::websocket_handler;
pub use membership::RoomMembership;
