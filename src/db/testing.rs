use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{DocStore, MemoryDocStore, StoreError};
use crate::ws::docid::DocId;

/// Memory store whose loads and saves can be slowed down or made to fail.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryDocStore,
    pub fail_loads: AtomicBool,
    pub fail_saves: AtomicBool,
    pub failing_doc: Option<DocId>,
    pub load_delay: Option<Duration>,
    pub loads: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_saves() -> Self {
        let store = Self::default();
        store.fail_saves.store(true, Ordering::SeqCst);
        store
    }

    /// Saves fail for `doc_id` only
    pub fn failing_saves_for(doc_id: &str) -> Self {
        let store = Self {
            failing_doc: Some(DocId::new(doc_id)),
            ..Self::default()
        };
        store.fail_saves.store(true, Ordering::SeqCst);
        store
    }

    pub fn slow_loads(delay: Duration) -> Self {
        Self {
            load_delay: Some(delay),
            ..Self::default()
        }
    }

    fn targets(&self, doc_id: &DocId) -> bool {
        self.failing_doc.as_ref().map_or(true, |failing| failing == doc_id)
    }
}

#[async_trait]
impl DocStore for FlakyStore {
    async fn load_state(&self, doc_id: &DocId) -> Result<Option<Vec<u8>>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_loads.load(Ordering::SeqCst) && self.targets(doc_id) {
            return Err(StoreError::Unavailable("load rejected".to_string()));
        }
        self.inner.load_state(doc_id).await
    }

    async fn save_state(&self, doc_id: &DocId, state: &[u8]) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) && self.targets(doc_id) {
            return Err(StoreError::Unavailable("save rejected".to_string()));
        }
        self.inner.save_state(doc_id, state).await
    }
}
