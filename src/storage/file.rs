//! Flat-file backend: one JSON artifact per collection under the session
//! root, one directory per dialog with its message dump and files.

use std::path::PathBuf;

use super::Record;
use crate::types::{DialogKind, ExportError, Message};

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn write_collection(
        &self,
        collection: &str,
        records: &[Record],
    ) -> Result<(), ExportError> {
        let values: Vec<&serde_json::Value> = records.iter().map(|(_, value)| value).collect();
        let path = self.root.join(format!("{}.list.json", collection));

        tokio::fs::write(&path, serde_json::to_vec(&values)?).await?;
        tracing::info!("[FileStore] wrote {} records to {}", values.len(), path.display());

        Ok(())
    }

    /// Write `<kind>/<dialog_id>/data.json` and create the sibling
    /// `files/` directory attachments download into.
    pub async fn write_messages(
        &self,
        kind: DialogKind,
        dialog_id: &str,
        messages: &[Message],
    ) -> Result<(), ExportError> {
        let base = self.root.join(kind.collection()).join(dialog_id);
        tokio::fs::create_dir_all(base.join("files")).await?;

        let values: Vec<&serde_json::Value> = messages.iter().map(|m| &m.raw).collect();
        tokio::fs::write(base.join("data.json"), serde_json::to_vec(&values)?).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> Record {
        (id.to_string(), json!({"id": id}))
    }

    #[tokio::test]
    async fn test_write_collection_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());

        store
            .write_collection("public_channels", &[record("C1"), record("C2")])
            .await
            .unwrap();

        let contents = std::fs::read_to_string(dir.path().join("public_channels.list.json")).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["id"], "C1");
    }

    #[tokio::test]
    async fn test_write_messages_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());

        let messages = vec![
            Message::from_value(json!({"ts": "2.000000", "text": "second"})).unwrap(),
            Message::from_value(json!({"ts": "1.000000", "text": "first"})).unwrap(),
        ];

        store
            .write_messages(DialogKind::Group, "G1", &messages)
            .await
            .unwrap();

        let base = dir.path().join("mpims").join("G1");
        assert!(base.join("files").is_dir());

        let contents = std::fs::read_to_string(base.join("data.json")).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["ts"], "2.000000");
    }

    #[tokio::test]
    async fn test_write_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());

        store.write_collection("ims", &[]).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("ims.list.json")).unwrap();
        assert_eq!(contents, "[]");
    }
}
