//! Background task lifecycle: registration, persistence, polling and resumption.

mod delivery;
mod manager;
mod poll;
mod resume;
mod service;
mod store;
mod task;

pub use delivery::{commit_on_delivery, SequencedFrame};
pub use manager::BackgroundTaskManager;
pub use poll::{poll_background_response, PollConfig};
pub use resume::{resume_frames, resume_sequenced, ResumeRequest};
pub use service::{TaskService, TaskStatusReport};
pub use store::{FileTaskStore, MemoryTaskStore, TaskStore};
pub use task::{BackgroundTask, StreamCursor, TaskStatus};
