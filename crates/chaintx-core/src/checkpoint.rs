//! Checkpoint manager: persists the cursor so a restarted stream resumes
//! where it stopped instead of jumping to the current head.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::CursorState;
use crate::error::IngestError;

/// A persisted cursor for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Chain slug (e.g. `"ethereum"`).
    pub chain_id: String,
    /// Unique stream identifier.
    pub stream_id: String,
    /// Cursor position and recent headers.
    pub cursor: CursorState,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    /// Store key for a chain + stream pair.
    pub fn key(chain_id: &str, stream_id: &str) -> String {
        format!("{chain_id}:{stream_id}")
    }
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include [`MemoryCursorStore`] and the JSON file store in
/// `chaintx-storage`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the latest checkpoint for a chain + stream pair.
    async fn load(&self, chain_id: &str, stream_id: &str)
        -> Result<Option<Checkpoint>, IngestError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IngestError>;

    /// Delete a checkpoint (e.g. when resetting a stream).
    async fn delete(&self, chain_id: &str, stream_id: &str) -> Result<(), IngestError>;
}

/// Binds a store to one stream's keys.
pub struct CheckpointManager {
    store: Box<dyn CursorStore>,
    chain_id: String,
    stream_id: String,
}

impl CheckpointManager {
    pub fn new(
        store: Box<dyn CursorStore>,
        chain_id: impl Into<String>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            stream_id: stream_id.into(),
        }
    }

    /// Load the saved cursor (returns `None` if none exists).
    pub async fn load_cursor(&self) -> Result<Option<CursorState>, IngestError> {
        Ok(self
            .store
            .load(&self.chain_id, &self.stream_id)
            .await?
            .map(|cp| cp.cursor))
    }

    /// Save the cursor after a fully published block.
    pub async fn save_cursor(&self, cursor: CursorState) -> Result<(), IngestError> {
        let cp = Checkpoint {
            chain_id: self.chain_id.clone(),
            stream_id: self.stream_id.clone(),
            cursor,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(cp).await
    }

    /// Drop the saved cursor; the next start begins at the chain head.
    pub async fn reset(&self) -> Result<(), IngestError> {
        self.store.delete(&self.chain_id, &self.stream_id).await
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory cursor store for tests and ephemeral streams.
#[derive(Default)]
pub struct MemoryCursorStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(
        &self,
        chain_id: &str,
        stream_id: &str,
    ) -> Result<Option<Checkpoint>, IngestError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(&Checkpoint::key(chain_id, stream_id))
            .cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IngestError> {
        let key = Checkpoint::key(&checkpoint.chain_id, &checkpoint.stream_id);
        self.data.lock().unwrap().insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, chain_id: &str, stream_id: &str) -> Result<(), IngestError> {
        self.data
            .lock()
            .unwrap()
            .remove(&Checkpoint::key(chain_id, stream_id));
        Ok(())
    }
}

#[async_trait]
impl<S: CursorStore + ?Sized> CursorStore for std::sync::Arc<S> {
    async fn load(
        &self,
        chain_id: &str,
        stream_id: &str,
    ) -> Result<Option<Checkpoint>, IngestError> {
        (**self).load(chain_id, stream_id).await
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IngestError> {
        (**self).save(checkpoint).await
    }

    async fn delete(&self, chain_id: &str, stream_id: &str) -> Result<(), IngestError> {
        (**self).delete(chain_id, stream_id).await
    }
}
