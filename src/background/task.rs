//! Background task records and stream cursors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::protocol::TaskStatus;

/// Last-seen position in a provider response stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCursor {
    pub response_id: String,
    pub sequence_number: u64,
}

impl StreamCursor {
    pub fn new(response_id: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            sequence_number: 0,
        }
    }

    /// Move forward to `sequence_number`; never moves backwards.
    pub fn advance(&mut self, sequence_number: u64) -> bool {
        if sequence_number > self.sequence_number {
            self.sequence_number = sequence_number;
            true
        } else {
            false
        }
    }
}

/// A long-running provider-side generation tracked for resumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub request_id: String,
    pub response_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub status: TaskStatus,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackgroundTask {
    pub fn new(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        cursor: &StreamCursor,
        chat_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.into(),
            response_id: cursor.response_id.clone(),
            user_id: user_id.into(),
            chat_id,
            status: TaskStatus::Queued,
            sequence_number: cursor.sequence_number,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Only tasks bound to a conversation get a durable record.
    pub fn is_durable(&self) -> bool {
        self.chat_id.is_some()
    }

    pub fn cursor(&self) -> StreamCursor {
        StreamCursor {
            response_id: self.response_id.clone(),
            sequence_number: self.sequence_number,
        }
    }
}
