use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{MarkerRecord, RecipientRecord, Storage};
use crate::source::UpdateMarker;

/// Accepted shapes of the marker file: the full record, or just the marker
/// as a bare JSON string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredMarker {
    Record(MarkerRecord),
    Bare(UpdateMarker),
}

impl StoredMarker {
    fn into_marker(self) -> UpdateMarker {
        match self {
            StoredMarker::Record(record) => record.last_updated,
            StoredMarker::Bare(marker) => marker,
        }
    }
}

/// Small JSON files on disk: one for the last marker, one for the recipients.
/// A missing file reads as empty state.
pub struct JsonFileStore {
    marker_path: PathBuf,
    recipients_path: PathBuf,
    // Registration runs concurrently with the update job; serialize
    // read-modify-write sequences on the recipient file.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(marker_path: PathBuf, recipients_path: PathBuf) -> Self {
        info!(
            "JSON store: marker at {}, recipients at {}",
            marker_path.display(),
            recipients_path.display()
        );
        Self {
            marker_path,
            recipients_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Raw entries of the recipient file. Entries are kept untouched so a
    /// rewrite never drops or reshapes what was already there.
    async fn read_recipient_entries(&self) -> Result<Vec<Value>> {
        Ok(read_json(&self.recipients_path).await?.unwrap_or_default())
    }
}

#[async_trait]
impl Storage for JsonFileStore {
    async fn load_marker(&self) -> Result<Option<UpdateMarker>> {
        let stored: Option<StoredMarker> = read_json(&self.marker_path).await?;
        Ok(stored.map(StoredMarker::into_marker))
    }

    async fn save_marker(&self, marker: &UpdateMarker) -> Result<()> {
        let record = MarkerRecord {
            last_updated: marker.clone(),
            recorded_at: Some(Utc::now()),
        };
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&self.marker_path, &record).await?;
        debug!("Saved update marker: {}", marker);
        Ok(())
    }

    async fn load_recipients(&self) -> Result<Vec<RecipientRecord>> {
        let records: Vec<RecipientRecord> = self
            .read_recipient_entries()
            .await?
            .into_iter()
            .map(RecipientRecord::from_value)
            .collect();

        let unusable = records.iter().filter(|r| r.chat_id.is_none()).count();
        if unusable > 0 {
            warn!(
                "{} of {} entries in {} have no usable chat_id",
                unusable,
                records.len(),
                self.recipients_path.display()
            );
        }
        Ok(records)
    }

    async fn add_recipient(&self, record: RecipientRecord) -> Result<bool> {
        let chat_id = record
            .chat_id
            .context("Recipient record has no chat_id")?;

        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_recipient_entries().await?;
        let known = entries
            .iter()
            .any(|entry| RecipientRecord::from_value(entry.clone()).chat_id == Some(chat_id));
        if known {
            return Ok(false);
        }

        entries.push(serde_json::to_value(&record).context("Failed to serialize recipient")?);
        write_json_atomic(&self.recipients_path, &entries).await?;
        info!("Registered chat {} ({} recipients)", chat_id, entries.len());
        Ok(true)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    if content.trim().is_empty() {
        return Ok(None);
    }

    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Write to a sibling temp file, then rename over the target.
async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e).with_context(|| format!("Failed to write {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> JsonFileStore {
        JsonFileStore::new(dir.join("last_updated.json"), dir.join("chat_ids.json"))
    }

    #[tokio::test]
    async fn test_missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.load_marker().await.unwrap().is_none());
        assert!(store.load_recipients().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_marker_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let marker = UpdateMarker::new("2024-02-10").unwrap();

        store.save_marker(&marker).await.unwrap();
        assert_eq!(store.load_marker().await.unwrap(), Some(marker));

        let raw = std::fs::read_to_string(dir.path().join("last_updated.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["last_updated"], "2024-02-10");
        assert!(json["recorded_at"].is_string());
        assert!(!dir.path().join("last_updated.tmp").exists());
    }

    #[tokio::test]
    async fn test_marker_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store
            .save_marker(&UpdateMarker::new("v1").unwrap())
            .await
            .unwrap();
        store
            .save_marker(&UpdateMarker::new("v2").unwrap())
            .await
            .unwrap();

        assert_eq!(store.load_marker().await.unwrap(), UpdateMarker::new("v2"));
    }

    #[tokio::test]
    async fn test_corrupt_marker_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("last_updated.json"), "{not json").unwrap();
        let store = store_in(dir.path());

        assert!(store.load_marker().await.is_err());
    }

    #[tokio::test]
    async fn test_add_recipient_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.add_recipient(RecipientRecord::new(42)).await.unwrap());
        assert!(!store.add_recipient(RecipientRecord::new(42)).await.unwrap());
        assert!(store.add_recipient(RecipientRecord::new(-100)).await.unwrap());

        let recipients = store.load_recipients().await.unwrap();
        let ids: Vec<_> = recipients.iter().filter_map(|r| r.chat_id).collect();
        assert_eq!(ids, vec![42, -100]);
    }

    #[tokio::test]
    async fn test_add_recipient_without_chat_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let record = RecipientRecord {
            chat_id: None,
            metadata: serde_json::Map::new(),
        };

        assert!(store.add_recipient(record).await.is_err());
        assert!(!dir.path().join("chat_ids.json").exists());
    }

    #[tokio::test]
    async fn test_unknown_metadata_preserved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("chat_ids.json"),
            r#"[{"chat_id": 7, "title": "Snap group", "muted": false}, {"note": "no id"}]"#,
        )
        .unwrap();
        let store = store_in(dir.path());

        store
            .add_recipient(RecipientRecord::new(8).with_meta("title", "Other"))
            .await
            .unwrap();

        let recipients = store.load_recipients().await.unwrap();
        assert_eq!(recipients.len(), 3);
        assert_eq!(recipients[0].chat_id, Some(7));
        assert_eq!(recipients[0].metadata["title"], "Snap group");
        assert_eq!(recipients[0].metadata["muted"], false);
        assert_eq!(recipients[1].chat_id, None);
        assert_eq!(recipients[1].metadata["note"], "no id");
        assert_eq!(recipients[2].metadata["title"], "Other");
    }

    #[tokio::test]
    async fn test_marker_without_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("last_updated.json"),
            r#"{"last_updated": "2024-01-01"}"#,
        )
        .unwrap();
        let store = store_in(dir.path());

        assert_eq!(
            store.load_marker().await.unwrap(),
            UpdateMarker::new("2024-01-01")
        );
    }

    #[tokio::test]
    async fn test_marker_as_bare_string() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("last_updated.json"), r#""2024-01-01""#).unwrap();
        let store = store_in(dir.path());

        assert_eq!(
            store.load_marker().await.unwrap(),
            UpdateMarker::new("2024-01-01")
        );
    }

    #[tokio::test]
    async fn test_bad_entries_do_not_hide_good_ones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("chat_ids.json"),
            r#"[{"chat_id": 1}, {"chat_id": "oops"}, {"chat_id": 2.5}, "stray", {"chat_id": 3}]"#,
        )
        .unwrap();
        let store = store_in(dir.path());

        let recipients = store.load_recipients().await.unwrap();
        assert_eq!(recipients.len(), 5);
        let ids: Vec<_> = recipients.iter().filter_map(|r| r.chat_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_registration_keeps_bad_entries_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("chat_ids.json"),
            r#"[{"chat_id": "oops", "title": "typo"}, "stray"]"#,
        )
        .unwrap();
        let store = store_in(dir.path());

        assert!(store.add_recipient(RecipientRecord::new(9)).await.unwrap());

        let raw = std::fs::read_to_string(dir.path().join("chat_ids.json")).unwrap();
        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            entries,
            vec![
                serde_json::json!({"chat_id": "oops", "title": "typo"}),
                serde_json::json!("stray"),
                serde_json::json!({"chat_id": 9}),
            ]
        );
    }
}
