pub mod shutdown;

pub use shutdown::{shutdown_channel, shutdown_requested};
