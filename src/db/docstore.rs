use async_trait::async_trait;

use crate::ws::docid::DocId;

/// Durable key-value persistence of the latest state blob of every document.
///
/// Each call is a single atomic operation against the backing store. Callers never
/// assume atomicity across a load followed by a save.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Load the stored state of a document, `None` if it was never saved.
    async fn load_state(&self, doc_id: &DocId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the stored state of a document.
    async fn save_state(&self, doc_id: &DocId, state: &[u8]) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    Decode(base64::DecodeError),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Decode(e) => write!(f, "Stored state is not valid base64: {}", e),
            StoreError::Unavailable(msg) => write!(f, "Document store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            StoreError::Decode(e) => Some(e),
            StoreError::Unavailable(_) => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

impl From<base64::DecodeError> for StoreError {
    fn from(e: base64::DecodeError) -> Self {
        StoreError::Decode(e)
    }
}
