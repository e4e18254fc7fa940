use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, error, info};

use super::docstore::{DocStore, StoreError};
use crate::ws::docid::DocId;

const CREATE_DOC_STATES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS doc_states (
        doc_id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        size BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

const LOAD_STATE_SQL: &str = r#"
    SELECT state
    FROM doc_states
    WHERE doc_id = $1
"#;

const SAVE_STATE_SQL: &str = r#"
    INSERT INTO doc_states (doc_id, state, size, updated_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (doc_id) DO UPDATE
        SET state = EXCLUDED.state,
            size = EXCLUDED.size,
            updated_at = NOW()
"#;

/// PostgreSQL backed document store
///
/// Every document is one row of `doc_states`, the state blob kept as base64 text.
pub struct PgDocStore {
    pool: PgPool,
}

impl PgDocStore {
    /// Create a lazily connecting pool
    ///
    /// No connection is opened here: an unreachable database shows up as an error
    /// of the first load or save instead of failing startup.
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `max_connections` - Upper bound of the pool
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        info!("Creating database connection pool...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect_lazy(database_url)?;

        Ok(Self { pool })
    }

    /// Create the `doc_states` table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_DOC_STATES_SQL)
            .execute(&self.pool)
            .await?;
        info!("Table doc_states is ready");
        Ok(())
    }
}

#[async_trait]
impl DocStore for PgDocStore {
    async fn load_state(&self, doc_id: &DocId) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query(LOAD_STATE_SQL)
            .bind(doc_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to load state for document {}: {}", doc_id, e);
                e
            })?;

        match row {
            Some(row) => {
                let encoded: String = row.try_get("state")?;
                let state = decode_state(&encoded)?;
                debug!("Loaded document {} ({} bytes)", doc_id, state.len());
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save_state(&self, doc_id: &DocId, state: &[u8]) -> Result<(), StoreError> {
        sqlx::query(SAVE_STATE_SQL)
            .bind(doc_id.as_str())
            .bind(encode_state(state))
            .bind(state.len() as i64)
            .execute(&self.pool)
            .await?;
        debug!("Saved document {} ({} bytes)", doc_id, state.len());
        Ok(())
    }
}

fn encode_state(state: &[u8]) -> String {
    general_purpose::STANDARD.encode(state)
}

fn decode_state(encoded: &str) -> Result<Vec<u8>, StoreError> {
    Ok(general_purpose::STANDARD.decode(encoded)?)
}
