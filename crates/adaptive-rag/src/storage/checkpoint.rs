use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::collaborators::{CheckpointStore, ThreadCheckpoint};

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: DashMap<String, ThreadCheckpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadCheckpoint>> {
        Ok(self.threads.get(thread_id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, thread_id: &str, checkpoint: &ThreadCheckpoint) -> Result<()> {
        self.threads.insert(thread_id.to_string(), checkpoint.clone());
        Ok(())
    }
}

/// One JSON file per thread under `<root>/threads/`.
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCheckpointStore {
    pub fn new(root: &Path) -> Result<Self> {
        let dir = root.join("threads");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create checkpoint dir {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadCheckpoint>> {
        let path = self.path_for(thread_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read checkpoint {}", path.display()))
            }
        };
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    async fn save(&self, thread_id: &str, checkpoint: &ThreadCheckpoint) -> Result<()> {
        let path = self.path_for(thread_id);
        let json = serde_json::to_string_pretty(checkpoint)?;

        let _guard = self.write_lock.lock().await;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write checkpoint {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;
        tracing::debug!(thread_id, path = %path.display(), "Checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentFilter, ThreadInfo};

    fn sample() -> ThreadCheckpoint {
        ThreadCheckpoint {
            active_document_filter: Some(DocumentFilter::new("report.pdf", "explicit filename")),
            original_query: "Tell me about report.pdf".into(),
            thread_info: Some(ThreadInfo::new("thread-1")),
            history: vec![],
        }
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("thread-1").await.unwrap().is_none());
        let checkpoint = sample();
        store.save("thread-1", &checkpoint).await.unwrap();
        assert_eq!(store.load("thread-1").await.unwrap(), Some(checkpoint));
        assert_eq!(store.thread_count(), 1);
    }

    #[tokio::test]
    async fn test_json_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileCheckpointStore::new(dir.path()).unwrap();
            store.save("thread/1", &sample()).await.unwrap();
        }
        let store = JsonFileCheckpointStore::new(dir.path()).unwrap();
        let loaded = store.load("thread/1").await.unwrap().unwrap();
        assert_eq!(loaded.original_query, "Tell me about report.pdf");
        assert!(dir.path().join("threads").join("thread_1.json").exists());
        assert!(!dir.path().join("threads").join("thread_1.json.tmp").exists());
        assert!(store.load("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("threads").join("broken.json"), "{not json").unwrap();

        let err = store.load("broken").await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse checkpoint"));
    }
}
