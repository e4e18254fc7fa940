pub mod dbdocs;
pub mod docstore;
pub mod memstore;

pub use dbdocs::PgDocStore;
pub use docstore::{DocStore, StoreError};
pub use memstore::MemoryDocStore;

#[cfg(test)]
pub(crate) mod testing;
