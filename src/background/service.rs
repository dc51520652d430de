//! Out-of-band status, cancel, list and resume operations.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SidestreamError;
use crate::protocol::{Frame, TaskStatus};
use crate::provider::{CompletionBackend, ResponseSnapshot};
use crate::types::Usage;

use super::delivery::SequencedFrame;
use super::manager::BackgroundTaskManager;
use super::poll::PollConfig;
use super::resume::{resume_frames, resume_sequenced, ResumeRequest};
use super::task::BackgroundTask;

/// Reply of the status and cancel endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusReport {
    pub response_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskStatusReport {
    fn from_snapshot(response_id: &str, status: TaskStatus, snapshot: ResponseSnapshot) -> Self {
        Self {
            response_id: response_id.to_string(),
            status,
            output_text: snapshot.output_text,
            usage: snapshot.usage,
            error: snapshot.error,
        }
    }
}

/// Background-task operations over one backend and task manager.
#[derive(Clone)]
pub struct TaskService {
    backend: Arc<dyn CompletionBackend>,
    tasks: Arc<BackgroundTaskManager>,
}

impl TaskService {
    pub fn new(backend: Arc<dyn CompletionBackend>, tasks: Arc<BackgroundTaskManager>) -> Self {
        Self { backend, tasks }
    }

    pub fn tasks(&self) -> &Arc<BackgroundTaskManager> {
        &self.tasks
    }

    /// Current provider-side status, mirrored into the registry.
    pub async fn status(&self, response_id: &str) -> Result<TaskStatusReport, SidestreamError> {
        let snapshot = self.backend.retrieve(response_id).await?;
        let status = match snapshot.status {
            Some(status) => {
                self.tasks.update_status(response_id, status).await;
                status
            }
            None => self
                .tasks
                .find(response_id)
                .await?
                .map(|t| t.status)
                .ok_or_else(|| {
                    SidestreamError::InvalidState(format!("no status reported for {response_id}"))
                })?,
        };
        Ok(TaskStatusReport::from_snapshot(response_id, status, snapshot))
    }

    /// Cancel a queued or in-progress response.
    pub async fn cancel(&self, response_id: &str) -> Result<TaskStatusReport, SidestreamError> {
        if let Some(task) = self.tasks.find(response_id).await? {
            if task.is_terminal() {
                return Err(SidestreamError::InvalidState(format!(
                    "background task {response_id} is already {}",
                    task.status
                )));
            }
        }
        let snapshot = self.backend.cancel(response_id).await?;
        let status = snapshot.status.unwrap_or(TaskStatus::Cancelled);
        self.tasks.update_status(response_id, status).await;
        info!(response_id, status = %status, "cancelled background response");
        Ok(TaskStatusReport::from_snapshot(response_id, status, snapshot))
    }

    /// Non-terminal tasks a reconnecting user can resume.
    pub async fn list_active(&self, user_id: &str) -> Vec<BackgroundTask> {
        self.tasks.get_active_for_user(user_id).await
    }

    pub async fn list_for_chat(&self, chat_id: &str) -> Result<Vec<BackgroundTask>, SidestreamError> {
        self.tasks.get_for_chat(chat_id).await
    }

    /// Frames the client missed since its cursor.
    pub fn resume(&self, request: ResumeRequest) -> BoxStream<'static, Frame> {
        resume_frames(Arc::clone(&self.backend), Arc::clone(&self.tasks), request)
    }

    pub fn resume_sequenced(&self, request: ResumeRequest) -> BoxStream<'static, SequencedFrame> {
        resume_sequenced(Arc::clone(&self.backend), Arc::clone(&self.tasks), request)
    }

    /// Wait for a response to finish by polling.
    pub async fn wait(
        &self,
        response_id: &str,
        config: &PollConfig,
        on_status_update: impl FnMut(TaskStatus) + Send,
    ) -> Result<ResponseSnapshot, SidestreamError> {
        self.tasks
            .poll(self.backend.as_ref(), response_id, config, on_status_update)
            .await
    }
}
