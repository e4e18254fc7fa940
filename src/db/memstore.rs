use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::docstore::{DocStore, StoreError};
use crate::ws::docid::DocId;

/// Process-local document store, used when no database is configured.
///
/// Contents do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryDocStore {
    docs: RwLock<HashMap<DocId, Vec<u8>>>,
    saves: AtomicU64,
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save_state` calls since creation
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn get(&self, doc_id: &DocId) -> Option<Vec<u8>> {
        self.docs.read().await.get(doc_id).cloned()
    }

    pub async fn insert(&self, doc_id: DocId, state: Vec<u8>) {
        self.docs.write().await.insert(doc_id, state);
    }
}

#[async_trait]
impl DocStore for MemoryDocStore {
    async fn load_state(&self, doc_id: &DocId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get(doc_id).await)
    }

    async fn save_state(&self, doc_id: &DocId, state: &[u8]) -> Result<(), StoreError> {
        self.docs.write().await.insert(doc_id.clone(), state.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
