//! In-memory registry of background tasks with write-behind persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

use crate::config::SidestreamConfig;
use crate::error::SidestreamError;
use crate::provider::{CompletionBackend, ResponseSnapshot};

use super::poll::{poll_background_response, PollConfig};
use super::store::TaskStore;
use super::task::{BackgroundTask, StreamCursor, TaskStatus};

const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);
const DEFAULT_PERSIST_INTERVAL: u64 = 10;

#[derive(Default)]
struct Registry {
    /// Keyed by request id.
    tasks: HashMap<String, Entry>,
    /// Response id -> request id.
    by_response: HashMap<String, String>,
}

impl Registry {
    fn entry_for_response(&mut self, response_id: &str) -> Option<&mut Entry> {
        let request_id = self.by_response.get(response_id)?;
        self.tasks.get_mut(request_id)
    }
}

struct Entry {
    task: BackgroundTask,
    persisted_sequence: u64,
}

enum PersistOp {
    Save(Box<BackgroundTask>),
    Delete(String),
    Flush(oneshot::Sender<()>),
}

/// Tracks in-flight background generations for one service instance.
///
/// Store writes go through a single writer task so they land in the order
/// they were issued; failures are logged and never surface to callers.
pub struct BackgroundTaskManager {
    registry: RwLock<Registry>,
    store: Option<Arc<dyn TaskStore>>,
    writer: Option<mpsc::UnboundedSender<PersistOp>>,
    retention: Duration,
    persist_interval: u64,
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTaskManager {
    /// A manager without durable storage.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            store: None,
            writer: None,
            retention: DEFAULT_RETENTION,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
        }
    }

    /// Attach a durable store. Must be called inside a Tokio runtime.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&store), rx));
        self.store = Some(store);
        self.writer = Some(tx);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_persist_interval(mut self, interval: u64) -> Self {
        self.persist_interval = interval.max(1);
        self
    }

    pub fn from_config(config: &SidestreamConfig, store: Option<Arc<dyn TaskStore>>) -> Self {
        let manager = Self::new()
            .with_retention(config.retention())
            .with_persist_interval(config.sequence_persist_interval);
        match store {
            Some(store) => manager.with_store(store),
            None => manager,
        }
    }

    fn persist(&self, op: PersistOp) {
        if let Some(writer) = &self.writer {
            if writer.send(op).is_err() {
                warn!("task store writer has stopped; dropping write");
            }
        }
    }

    /// Track a new provider response for `request_id`.
    ///
    /// A later iteration of the same request re-registers with its own
    /// response id and replaces the earlier mapping.
    pub async fn register(
        &self,
        request_id: &str,
        user_id: &str,
        cursor: &StreamCursor,
        chat_id: Option<String>,
    ) -> BackgroundTask {
        let mut task = BackgroundTask::new(request_id, user_id, cursor, chat_id);
        let mut superseded = None;
        {
            let mut registry = self.registry.write().await;
            if let Some(previous) = registry.tasks.get(request_id) {
                task.created_at = previous.task.created_at;
                let previous = previous.task.clone();
                if previous.response_id != task.response_id {
                    registry.by_response.remove(&previous.response_id);
                    superseded = Some(previous);
                }
            }
            registry
                .by_response
                .insert(task.response_id.clone(), request_id.to_string());
            registry.tasks.insert(
                request_id.to_string(),
                Entry {
                    task: task.clone(),
                    persisted_sequence: task.sequence_number,
                },
            );
        }
        debug!(request_id, response_id = %task.response_id, "registered background task");
        // A finished earlier iteration is no longer reachable; a live one is
        // left for the cleanup sweep once it ends.
        if let Some(previous) = superseded.filter(|t| t.is_durable() && t.is_terminal()) {
            self.persist(PersistOp::Delete(previous.response_id));
        }
        if task.is_durable() {
            self.persist(PersistOp::Save(Box::new(task.clone())));
        }
        task
    }

    /// Apply a status change. Illegal transitions are ignored.
    ///
    /// Tasks known only to the durable store are updated there.
    pub async fn update_status(&self, response_id: &str, status: TaskStatus) -> Option<BackgroundTask> {
        let mut registry = self.registry.write().await;
        if registry.entry_for_response(response_id).is_none() {
            drop(registry);
            return self.update_persisted_status(response_id, status).await;
        }
        let entry = registry.entry_for_response(response_id)?;
        if entry.task.status == status {
            return Some(entry.task.clone());
        }
        if !entry.task.status.can_transition_to(status) {
            debug!(response_id, from = %entry.task.status, to = %status, "ignoring status transition");
            return Some(entry.task.clone());
        }
        entry.task.status = status;
        entry.task.updated_at = Utc::now();
        entry.persisted_sequence = entry.task.sequence_number;
        let task = entry.task.clone();
        drop(registry);
        if task.is_durable() {
            self.persist(PersistOp::Save(Box::new(task.clone())));
        }
        Some(task)
    }

    async fn update_persisted_status(&self, response_id: &str, status: TaskStatus) -> Option<BackgroundTask> {
        let store = self.store.as_ref()?;
        let mut task = match store.load(response_id).await {
            Ok(task) => task?,
            Err(err) => {
                warn!(response_id, error = %err, "could not load persisted task");
                return None;
            }
        };
        if task.status == status || !task.status.can_transition_to(status) {
            return Some(task);
        }
        task.status = status;
        task.updated_at = Utc::now();
        debug!(response_id, status = %status, "updating persisted task");
        self.persist(PersistOp::Save(Box::new(task.clone())));
        Some(task)
    }

    /// Advance the cursor. Lower or equal sequence numbers are no-ops; durable
    /// writes happen once per persist interval.
    pub async fn update_sequence(&self, response_id: &str, sequence_number: u64) -> Option<BackgroundTask> {
        let mut registry = self.registry.write().await;
        let interval = self.persist_interval;
        let entry = registry.entry_for_response(response_id)?;
        if sequence_number <= entry.task.sequence_number {
            return Some(entry.task.clone());
        }
        entry.task.sequence_number = sequence_number;
        entry.task.updated_at = Utc::now();
        let due = sequence_number - entry.persisted_sequence >= interval;
        if due {
            entry.persisted_sequence = sequence_number;
        }
        let task = entry.task.clone();
        drop(registry);
        if due && task.is_durable() {
            debug!(response_id, sequence_number, "persisting stream cursor");
            self.persist(PersistOp::Save(Box::new(task.clone())));
        }
        Some(task)
    }

    pub async fn get(&self, request_id: &str) -> Option<BackgroundTask> {
        let registry = self.registry.read().await;
        registry.tasks.get(request_id).map(|e| e.task.clone())
    }

    pub async fn get_by_response(&self, response_id: &str) -> Option<BackgroundTask> {
        let registry = self.registry.read().await;
        let request_id = registry.by_response.get(response_id)?;
        registry.tasks.get(request_id).map(|e| e.task.clone())
    }

    /// Look up a task in memory, falling back to the durable store.
    pub async fn find(&self, response_id: &str) -> Result<Option<BackgroundTask>, SidestreamError> {
        if let Some(task) = self.get_by_response(response_id).await {
            return Ok(Some(task));
        }
        match &self.store {
            Some(store) => store.load(response_id).await,
            None => Ok(None),
        }
    }

    /// Non-terminal tasks owned by `user_id`, oldest first.
    pub async fn get_active_for_user(&self, user_id: &str) -> Vec<BackgroundTask> {
        let registry = self.registry.read().await;
        let mut tasks: Vec<BackgroundTask> = registry
            .tasks
            .values()
            .filter(|e| e.task.user_id == user_id && !e.task.is_terminal())
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Tasks belonging to a conversation. In-memory state wins over the
    /// persisted record for the same response id.
    pub async fn get_for_chat(&self, chat_id: &str) -> Result<Vec<BackgroundTask>, SidestreamError> {
        let mut by_response: HashMap<String, BackgroundTask> = match &self.store {
            Some(store) => store
                .list_for_chat(chat_id)
                .await?
                .into_iter()
                .map(|t| (t.response_id.clone(), t))
                .collect(),
            None => HashMap::new(),
        };
        {
            let registry = self.registry.read().await;
            for entry in registry.tasks.values() {
                if entry.task.chat_id.as_deref() == Some(chat_id) {
                    by_response.insert(entry.task.response_id.clone(), entry.task.clone());
                }
            }
        }
        let mut tasks: Vec<BackgroundTask> = by_response.into_values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    /// Mark a queued or in-progress task as cancelled.
    pub async fn cancel(&self, response_id: &str) -> Result<BackgroundTask, SidestreamError> {
        let current = self
            .get_by_response(response_id)
            .await
            .ok_or_else(|| SidestreamError::NotFound(format!("background task {response_id}")))?;
        if current.is_terminal() {
            return Err(SidestreamError::InvalidState(format!(
                "background task {response_id} is already {}",
                current.status
            )));
        }
        self.update_status(response_id, TaskStatus::Cancelled)
            .await
            .ok_or_else(|| SidestreamError::NotFound(format!("background task {response_id}")))
    }

    /// Drop terminal tasks older than the retention window.
    pub async fn cleanup(&self) -> usize {
        let retention = chrono::Duration::seconds(self.retention.as_secs() as i64);
        self.cleanup_before(Utc::now() - retention).await
    }

    /// Drop terminal tasks last updated before `cutoff`, in memory and in
    /// the durable store.
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let removed: Vec<BackgroundTask> = {
            let mut registry = self.registry.write().await;
            let expired: Vec<String> = registry
                .tasks
                .iter()
                .filter(|(_, e)| e.task.is_terminal() && e.task.updated_at < cutoff)
                .map(|(request_id, _)| request_id.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|request_id| {
                    let entry = registry.tasks.remove(&request_id)?;
                    registry.by_response.remove(&entry.task.response_id);
                    Some(entry.task)
                })
                .collect()
        };
        for task in &removed {
            if task.is_durable() {
                self.persist(PersistOp::Delete(task.response_id.clone()));
            }
        }
        let swept = self.sweep_store(cutoff, &removed).await;
        let count = removed.len() + swept;
        if count > 0 {
            debug!(count, swept, "cleaned up background tasks");
        }
        count
    }

    /// Delete expired terminal records this instance no longer tracks, such
    /// as those left by a previous process or a superseded iteration.
    async fn sweep_store(&self, cutoff: DateTime<Utc>, removed: &[BackgroundTask]) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let persisted = match store.list().await {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(error = %err, "could not list persisted tasks for cleanup");
                return 0;
            }
        };
        let registry = self.registry.read().await;
        let expired: Vec<String> = persisted
            .into_iter()
            .filter(|t| t.is_terminal() && t.updated_at < cutoff)
            .filter(|t| !registry.by_response.contains_key(&t.response_id))
            .filter(|t| !removed.iter().any(|r| r.response_id == t.response_id))
            .map(|t| t.response_id)
            .collect();
        drop(registry);
        for response_id in &expired {
            self.persist(PersistOp::Delete(response_id.clone()));
        }
        expired.len()
    }

    /// Reload non-terminal tasks from the durable store after a restart.
    pub async fn restore(&self) -> Result<usize, SidestreamError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let persisted = store.list().await?;
        let mut registry = self.registry.write().await;
        let mut restored = 0;
        for task in persisted.into_iter().filter(|t| !t.is_terminal()) {
            if registry.tasks.contains_key(&task.request_id) {
                continue;
            }
            registry
                .by_response
                .insert(task.response_id.clone(), task.request_id.clone());
            registry.tasks.insert(
                task.request_id.clone(),
                Entry {
                    persisted_sequence: task.sequence_number,
                    task,
                },
            );
            restored += 1;
        }
        Ok(restored)
    }

    /// Wait until every write issued so far has reached the store.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(PersistOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Poll the backend until the response is terminal, mirroring each
    /// status change into the registry.
    ///
    /// A poll timeout marks the task `incomplete` before the error is
    /// returned.
    pub async fn poll<F>(
        &self,
        backend: &dyn CompletionBackend,
        response_id: &str,
        config: &PollConfig,
        mut on_status_update: F,
    ) -> Result<ResponseSnapshot, SidestreamError>
    where
        F: FnMut(TaskStatus) + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poll = poll_background_response(backend, response_id, config, move |status| {
            let _ = tx.send(status);
        });
        tokio::pin!(poll);

        let result = loop {
            tokio::select! {
                biased;
                Some(status) = rx.recv() => {
                    self.update_status(response_id, status).await;
                    on_status_update(status);
                }
                result = &mut poll => break result,
            }
        };
        while let Ok(status) = rx.try_recv() {
            self.update_status(response_id, status).await;
            on_status_update(status);
        }

        if let Err(SidestreamError::PollTimeout { elapsed_ms, .. }) = &result {
            warn!(response_id, elapsed_ms, "background poll timed out");
            self.update_status(response_id, TaskStatus::Incomplete).await;
        }
        result
    }
}

async fn run_writer(store: Arc<dyn TaskStore>, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Save(task) => {
                if let Err(err) = store.save(&task).await {
                    warn!(response_id = %task.response_id, error = %err, "failed to persist background task");
                }
            }
            PersistOp::Delete(response_id) => {
                if let Err(err) = store.delete(&response_id).await {
                    warn!(response_id = %response_id, error = %err, "failed to delete background task");
                }
            }
            PersistOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
