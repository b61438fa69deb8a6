//! Persistence backends: flat files for one-shot exports, a document
//! store for incremental sync.

mod file;
mod store;

pub use file::FileStore;
pub use store::DocumentStore;

use serde_json::Value;

use crate::config::Config;
use crate::session::ExportSession;
use crate::types::{DialogKind, ExportError, Message, User};

/// A record ready for persistence: natural id plus the full payload.
pub type Record = (String, Value);

pub fn message_records(messages: &[Message]) -> Vec<Record> {
    messages
        .iter()
        .map(|m| (m.ts.clone(), m.raw.clone()))
        .collect()
}

pub enum Storage {
    Files(FileStore),
    Store(DocumentStore),
}

impl Storage {
    pub fn from_config(config: &Config, session: &ExportSession) -> Self {
        if config.store.enabled {
            tracing::info!("[Storage] using document store at {}", config.store.path);
            Storage::Store(DocumentStore::new(&config.store.path))
        } else {
            tracing::info!("[Storage] using flat files under {}", session.root().display());
            Storage::Files(FileStore::new(session.root().to_path_buf()))
        }
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Storage::Store(_))
    }

    /// Persist a whole collection. File mode writes one artifact per call;
    /// store mode bulk-inserts with insert-or-replace fallback.
    pub async fn write_collection(
        &self,
        collection: &str,
        records: &[Record],
    ) -> Result<(), ExportError> {
        match self {
            Storage::Files(files) => files.write_collection(collection, records).await,
            Storage::Store(store) => store.write_collection(collection, records).await,
        }
    }

    /// Persist one dialog's full message history.
    pub async fn write_messages(
        &self,
        kind: DialogKind,
        dialog_id: &str,
        messages: &[Message],
    ) -> Result<(), ExportError> {
        match self {
            Storage::Files(files) => files.write_messages(kind, dialog_id, messages).await,
            Storage::Store(store) => {
                store
                    .write_collection(dialog_id, &message_records(messages))
                    .await
            }
        }
    }

    /// Timestamp of the newest stored message for a dialog; 0 when the
    /// dialog has no history yet. File mode has no cross-run memory.
    pub async fn last_cursor(&self, dialog_id: &str) -> Result<f64, ExportError> {
        match self {
            Storage::Files(_) => Ok(0.0),
            Storage::Store(store) => store.last_cursor(dialog_id).await,
        }
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ExportError> {
        match self {
            Storage::Files(_) => Err(ExportError::Unsupported(
                "listing users requires the document store backend",
            )),
            Storage::Store(store) => store.list_users().await,
        }
    }

    pub async fn upsert_user(&self, user: &User) -> Result<(), ExportError> {
        match self {
            Storage::Files(_) => Err(ExportError::Unsupported(
                "user upsert requires the document store backend",
            )),
            Storage::Store(store) => store.upsert_user(user).await,
        }
    }
}
