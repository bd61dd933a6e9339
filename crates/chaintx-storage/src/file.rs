//! JSON file cursor store.
//!
//! All streams share one document mapping `chain:stream` to its checkpoint.
//! Saves write a sibling temp file and rename it over the original, so a
//! crash mid-write leaves the previous cursor intact.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use chaintx_core::checkpoint::{Checkpoint, CursorStore};
use chaintx_core::error::IngestError;

type Document = BTreeMap<String, Checkpoint>;

/// Cursor store persisted to a single JSON file.
pub struct JsonFileCursorStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileCursorStore {
    /// Open a store at `path`. The file is created on the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Document, IngestError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(storage(&self.path, "read", e)),
        };
        serde_json::from_slice(&raw).map_err(|e| {
            IngestError::Storage(format!("corrupt cursor file {}: {e}", self.path.display()))
        })
    }

    async fn write_document(&self, doc: &Document) -> Result<(), IngestError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| storage(dir, "create", e))?;
        }
        let body = serde_json::to_vec_pretty(doc)
            .map_err(|e| IngestError::Storage(format!("cannot encode cursor: {e}")))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| storage(&tmp, "write", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage(&self.path, "replace", e))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "cursor".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn storage(path: &Path, op: &str, e: std::io::Error) -> IngestError {
    IngestError::Storage(format!("cannot {op} {}: {e}", path.display()))
}

#[async_trait]
impl CursorStore for JsonFileCursorStore {
    async fn load(
        &self,
        chain_id: &str,
        stream_id: &str,
    ) -> Result<Option<Checkpoint>, IngestError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        Ok(doc.remove(&Checkpoint::key(chain_id, stream_id)))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IngestError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        let key = Checkpoint::key(&checkpoint.chain_id, &checkpoint.stream_id);
        tracing::trace!(
            key = %key,
            block = checkpoint.cursor.last_number,
            path = %self.path.display(),
            "Saving cursor"
        );
        doc.insert(key, checkpoint);
        self.write_document(&doc).await
    }

    async fn delete(&self, chain_id: &str, stream_id: &str) -> Result<(), IngestError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        if doc.remove(&Checkpoint::key(chain_id, stream_id)).is_some() {
            self.write_document(&doc).await?;
        }
        Ok(())
    }
}
