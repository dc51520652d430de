//! Durable storage for background task records.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::SidestreamError;

use super::task::BackgroundTask;

/// Storage abstraction for persisted task records, keyed by response id.
///
/// Writes are last-write-wins; readers in other processes see them
/// eventually.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save(&self, task: &BackgroundTask) -> Result<(), SidestreamError>;
    async fn load(&self, response_id: &str) -> Result<Option<BackgroundTask>, SidestreamError>;
    async fn delete(&self, response_id: &str) -> Result<(), SidestreamError>;
    async fn list(&self) -> Result<Vec<BackgroundTask>, SidestreamError>;
    async fn list_for_chat(&self, chat_id: &str) -> Result<Vec<BackgroundTask>, SidestreamError>;
}

/// In-process store, mainly for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, BackgroundTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &BackgroundTask) -> Result<(), SidestreamError> {
        self.tasks
            .write()
            .await
            .insert(task.response_id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, response_id: &str) -> Result<Option<BackgroundTask>, SidestreamError> {
        Ok(self.tasks.read().await.get(response_id).cloned())
    }

    async fn delete(&self, response_id: &str) -> Result<(), SidestreamError> {
        self.tasks.write().await.remove(response_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BackgroundTask>, SidestreamError> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn list_for_chat(&self, chat_id: &str) -> Result<Vec<BackgroundTask>, SidestreamError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.chat_id.as_deref() == Some(chat_id))
            .cloned()
            .collect())
    }
}

/// File-backed store: one TOML record per response id under `tasks/`,
/// plus one index file per chat under `chats/`.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    base_dir: PathBuf,
}

impl FileTaskStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn task_path(&self, response_id: &str) -> PathBuf {
        self.base_dir
            .join("tasks")
            .join(format!("{}.toml", normalize_key(response_id)))
    }

    fn chat_path(&self, chat_id: &str) -> PathBuf {
        self.base_dir
            .join("chats")
            .join(format!("{}.toml", normalize_key(chat_id)))
    }

    async fn ensure_parent(path: &Path) -> Result<(), SidestreamError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn read_chat_index(&self, chat_id: &str) -> Result<ChatIndexFile, SidestreamError> {
        let path = self.chat_path(chat_id);
        match read_optional(&path).await? {
            Some(raw) => toml::from_str(&raw).map_err(store_err),
            None => Ok(ChatIndexFile {
                version: 1,
                chat_id: chat_id.to_string(),
                response_ids: BTreeSet::new(),
            }),
        }
    }

    async fn write_chat_index(&self, index: &ChatIndexFile) -> Result<(), SidestreamError> {
        let path = self.chat_path(&index.chat_id);
        if index.response_ids.is_empty() {
            return remove_optional(&path).await;
        }
        Self::ensure_parent(&path).await?;
        fs::write(&path, toml::to_string(index).map_err(store_err)?).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn save(&self, task: &BackgroundTask) -> Result<(), SidestreamError> {
        let path = self.task_path(&task.response_id);
        Self::ensure_parent(&path).await?;
        let file = TaskFile {
            version: 1,
            saved_at: Utc::now(),
            task: task.clone(),
        };
        fs::write(&path, toml::to_string(&file).map_err(store_err)?).await?;

        if let Some(chat_id) = task.chat_id.as_deref() {
            let mut index = self.read_chat_index(chat_id).await?;
            if index.response_ids.insert(task.response_id.clone()) {
                self.write_chat_index(&index).await?;
            }
        }
        Ok(())
    }

    async fn load(&self, response_id: &str) -> Result<Option<BackgroundTask>, SidestreamError> {
        match read_optional(&self.task_path(response_id)).await? {
            Some(raw) => {
                let file: TaskFile = toml::from_str(&raw).map_err(store_err)?;
                Ok(Some(file.task))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, response_id: &str) -> Result<(), SidestreamError> {
        let existing = self.load(response_id).await?;
        remove_optional(&self.task_path(response_id)).await?;
        if let Some(chat_id) = existing.and_then(|t| t.chat_id) {
            let mut index = self.read_chat_index(&chat_id).await?;
            if index.response_ids.remove(response_id) {
                self.write_chat_index(&index).await?;
            }
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BackgroundTask>, SidestreamError> {
        let dir = self.base_dir.join("tasks");
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let raw = fs::read_to_string(&path).await?;
            match toml::from_str::<TaskFile>(&raw) {
                Ok(file) => tasks.push(file.task),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable task record")
                }
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn list_for_chat(&self, chat_id: &str) -> Result<Vec<BackgroundTask>, SidestreamError> {
        let index = self.read_chat_index(chat_id).await?;
        let mut tasks = Vec::with_capacity(index.response_ids.len());
        for response_id in &index.response_ids {
            if let Some(task) = self.load(response_id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskFile {
    version: u32,
    saved_at: DateTime<Utc>,
    task: BackgroundTask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatIndexFile {
    version: u32,
    chat_id: String,
    response_ids: BTreeSet<String>,
}

async fn read_optional(path: &Path) -> Result<Option<String>, SidestreamError> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<(), SidestreamError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn store_err(err: impl std::fmt::Display) -> SidestreamError {
    SidestreamError::Store(err.to_string())
}

/// Keep ids filesystem-safe.
fn normalize_key(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::task::StreamCursor;

    #[test]
    fn keys_are_filesystem_safe() {
        assert_eq!(normalize_key("resp_abc-1"), "resp_abc-1");
        assert_eq!(normalize_key("../etc/passwd"), "___etc_passwd");
        assert_eq!(normalize_key("  "), "_");
    }

    #[tokio::test]
    async fn memory_store_filters_by_chat() {
        let store = MemoryTaskStore::new();
        let a = BackgroundTask::new("r1", "u1", &StreamCursor::new("resp_a"), Some("c1".into()));
        let b = BackgroundTask::new("r2", "u1", &StreamCursor::new("resp_b"), Some("c2".into()));
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();
        let tasks = store.list_for_chat("c1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].response_id, "resp_a");
    }
}
