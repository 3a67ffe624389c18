//! Local filesystem duplicate store.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! └── delivered/
//!     └── {destination}.jsonl   # append-only DeliveryRecord lines
//! ```
//!
//! A partition is read once, on first use, into an in-memory set. Records
//! are appended and synced one line at a time, so a crash or a failed write
//! loses at most the line being written. Such a torn line is skipped on the
//! next load, and the next append starts on a fresh line.

use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::DeliveryRecord;
use crate::storage::DuplicateStore;
use crate::utils::partition_name;

const PARTITION_DIR: &str = "delivered";

/// Local filesystem storage backend.
pub struct LocalStorage {
    root_dir: PathBuf,
    /// Delivered posting ids per loaded destination
    partitions: Mutex<HashMap<String, HashSet<String>>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            partitions: Mutex::new(HashMap::new()),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Path of a destination's partition file.
    fn partition_path(&self, destination_id: &str) -> PathBuf {
        self.root_dir
            .join(PARTITION_DIR)
            .join(format!("{}.jsonl", partition_name(destination_id)))
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::store(format!("cannot read {}: {e}", path.display()))),
        }
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Parse a partition file, skipping lines that are not valid records.
    fn parse_records(path: &Path, bytes: &[u8]) -> Vec<DeliveryRecord> {
        String::from_utf8_lossy(bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<DeliveryRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("Skipping malformed record in {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    async fn load_partition(&self, destination_id: &str) -> Result<HashSet<String>> {
        let path = self.partition_path(destination_id);
        let Some(bytes) = Self::read_bytes(&path).await? else {
            return Ok(HashSet::new());
        };

        let ids = Self::parse_records(&path, &bytes)
            .into_iter()
            .map(|r| r.posting_id)
            .collect::<HashSet<_>>();
        log::debug!(
            "Loaded {} delivered postings for destination {}",
            ids.len(),
            destination_id
        );

        Ok(ids)
    }

    /// Append one newline-terminated line. A file left without a trailing
    /// newline by an earlier torn write is terminated first.
    async fn append_line(&self, destination_id: &str, line: &str) -> Result<()> {
        let path = self.partition_path(destination_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        let mut out = String::with_capacity(line.len() + 1);
        if file.metadata().await?.len() > 0 {
            file.seek(SeekFrom::End(-1)).await?;
            if file.read_u8().await? != b'\n' {
                out.push('\n');
            }
        }
        out.push_str(line);

        file.write_all(out.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Number of delivery records per destination partition.
    pub async fn partition_counts(&self) -> Result<Vec<(String, usize)>> {
        let dir = self.root_dir.join(PARTITION_DIR);
        let mut counts = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(counts),
            Err(e) => return Err(AppError::store(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let bytes = Self::read_bytes(&path).await?.unwrap_or_default();
            counts.push((name, Self::parse_records(&path, &bytes).len()));
        }

        counts.sort();
        Ok(counts)
    }
}

#[async_trait]
impl DuplicateStore for LocalStorage {
    async fn contains(&self, destination_id: &str, posting_id: &str) -> Result<bool> {
        let mut partitions = self.partitions.lock().await;
        if !partitions.contains_key(destination_id) {
            let partition = self.load_partition(destination_id).await?;
            partitions.insert(destination_id.to_string(), partition);
        }
        Ok(partitions
            .get(destination_id)
            .is_some_and(|ids| ids.contains(posting_id)))
    }

    async fn record(&self, destination_id: &str, posting_id: &str) -> Result<()> {
        let mut partitions = self.partitions.lock().await;
        if !partitions.contains_key(destination_id) {
            let partition = self.load_partition(destination_id).await?;
            partitions.insert(destination_id.to_string(), partition);
        }
        let Some(ids) = partitions.get_mut(destination_id) else {
            return Err(AppError::store("partition vanished"));
        };
        if ids.contains(posting_id) {
            return Ok(());
        }

        let record = DeliveryRecord::now(destination_id, posting_id);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        self.append_line(destination_id, &line)
            .await
            .map_err(|e| AppError::store(format!("cannot append record: {e}")))?;

        ids.insert(posting_id.to_string());
        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut partitions = self.partitions.lock().await;
        let dir = self.root_dir.join(PARTITION_DIR);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::store(e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let bytes = Self::read_bytes(&path).await?.unwrap_or_default();
            let records = Self::parse_records(&path, &bytes);
            let total = records.len();

            let kept: Vec<DeliveryRecord> = records
                .into_iter()
                .filter(|r| r.delivered_at >= cutoff)
                .collect();
            if kept.len() == total {
                continue;
            }
            removed += total - kept.len();

            let mut out = String::new();
            for record in &kept {
                out.push_str(&serde_json::to_string(record)?);
                out.push('\n');
            }
            Self::write_bytes(&path, out.as_bytes()).await?;
            log::info!(
                "Pruned {} records from {}",
                total - kept.len(),
                path.display()
            );
        }

        // Partitions reload lazily from the rewritten files.
        partitions.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_then_contains() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(!storage.contains("100", "p1").await.unwrap());
        storage.record("100", "p1").await.unwrap();
        assert!(storage.contains("100", "p1").await.unwrap());
        assert!(!storage.contains("200", "p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let storage = LocalStorage::new(tmp.path());
            storage.record("100", "p1").await.unwrap();
        }
        let reopened = LocalStorage::new(tmp.path());
        assert!(reopened.contains("100", "p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.record("100", "p1").await.unwrap();
        storage.record("100", "p1").await.unwrap();
        assert!(storage.contains("100", "p1").await.unwrap());

        let content = std::fs::read_to_string(storage.partition_path("100")).unwrap();
        assert_eq!(content.lines().count(), 1);

        let reopened = LocalStorage::new(tmp.path());
        reopened.record("100", "p1").await.unwrap();
        let content = std::fs::read_to_string(reopened.partition_path("100")).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_torn_line_is_skipped_and_repaired() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.record("100", "p1").await.unwrap();

        let path = storage.partition_path("100");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(r#"{"posting_id":"p2","destina"#);
        std::fs::write(&path, content).unwrap();

        let reopened = LocalStorage::new(tmp.path());
        assert!(reopened.contains("100", "p1").await.unwrap());
        assert!(!reopened.contains("100", "p2").await.unwrap());

        reopened.record("100", "p3").await.unwrap();
        let third = LocalStorage::new(tmp.path());
        assert!(third.contains("100", "p3").await.unwrap());
        assert!(third.contains("100", "p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_after_partial_append_is_durable() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.record("100", "p1").await.unwrap();

        // A write that died halfway, while the partition stayed loaded.
        let path = storage.partition_path("100");
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, br#"{"posting_id":"px","dest"#).unwrap();
        drop(file);

        storage.record("100", "p2").await.unwrap();

        let reopened = LocalStorage::new(tmp.path());
        assert!(reopened.contains("100", "p1").await.unwrap());
        assert!(reopened.contains("100", "p2").await.unwrap());
        assert!(!reopened.contains("100", "px").await.unwrap());
        assert_eq!(reopened.partition_counts().await.unwrap(), vec![("100".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_unreadable_partition_fails_closed() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        // A directory where the partition file should be cannot be read.
        std::fs::create_dir_all(storage.partition_path("100")).unwrap();
        let result = storage.contains("100", "p1").await;
        assert!(matches!(result, Err(AppError::Store(_))));
    }

    #[tokio::test]
    async fn test_prune_drops_old_records() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let old = DeliveryRecord {
            posting_id: "old".to_string(),
            destination_id: "100".to_string(),
            delivered_at: Utc::now() - Duration::days(40),
        };
        let path = storage.partition_path("100");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("{}\n", serde_json::to_string(&old).unwrap())).unwrap();
        storage.record("100", "new").await.unwrap();

        let removed = storage.prune(Utc::now() - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!storage.contains("100", "old").await.unwrap());
        assert!(storage.contains("100", "new").await.unwrap());
    }

    #[tokio::test]
    async fn test_partition_counts() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(storage.partition_counts().await.unwrap().is_empty());

        storage.record("100", "a").await.unwrap();
        storage.record("100", "b").await.unwrap();
        storage.record("200", "a").await.unwrap();

        assert_eq!(
            storage.partition_counts().await.unwrap(),
            vec![("100".to_string(), 2), ("200".to_string(), 1)]
        );
    }
}
