//! Error types for sidestream.

pub mod unified;

pub use unified::{ErrorCategory, ErrorCode, ErrorDetails};

use thiserror::Error;

/// Primary error type for all sidestream operations.
#[derive(Error, Debug)]
pub enum SidestreamError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        details: Option<ErrorDetails>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Quota exceeded: {0}")]
    Quota(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Backend overloaded: {0}")]
    Overloaded(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Background poll for {response_id} exceeded {elapsed_ms}ms")]
    PollTimeout { response_id: String, elapsed_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cancelled")]
    Cancelled,
}

impl SidestreamError {
    /// Create an API error from a status code.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// Create an API error with provider-supplied details.
    pub fn api_with_details(status: u16, message: impl Into<String>, details: ErrorDetails) -> Self {
        Self::Api {
            status,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a broad category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Configuration(_) => ErrorCategory::Client,
            Self::Authentication(_) | Self::Quota(_) => ErrorCategory::Account,
            Self::Network(_)
            | Self::RateLimited { .. }
            | Self::Overloaded(_)
            | Self::Timeout(_) => ErrorCategory::Transient,
            Self::Api { .. } => match self.code() {
                ErrorCode::Validation | ErrorCode::NotFound => ErrorCategory::Client,
                ErrorCode::Auth | ErrorCode::Quota => ErrorCategory::Account,
                ErrorCode::RateLimited
                | ErrorCode::Overloaded
                | ErrorCode::ServerError
                | ErrorCode::Timeout => ErrorCategory::Transient,
                _ => ErrorCategory::Internal,
            },
            Self::ToolExecution { .. } => ErrorCategory::Tool,
            Self::PollTimeout { .. } => ErrorCategory::Background,
            Self::NotFound(_) => ErrorCategory::Client,
            _ => ErrorCategory::Internal,
        }
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::Authentication(_) => ErrorCode::Auth,
            Self::Quota(_) => ErrorCode::Quota,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Overloaded(_) => ErrorCode::Overloaded,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Network(err) if err.is_timeout() => ErrorCode::Timeout,
            Self::Network(_) => ErrorCode::ServerError,
            Self::ToolExecution { .. } => ErrorCode::ToolExecution,
            Self::PollTimeout { .. } => ErrorCode::PollTimeout,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Api {
                status,
                message,
                details,
            } => {
                let provider_code = details.as_ref().and_then(|d| d.provider_code.as_deref());
                unified::code_for_status(*status, provider_code, message)
            }
            _ => ErrorCode::Unknown,
        }
    }

    /// Whether the transport layer may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_)) || self.code().is_retryable()
    }

    /// Short user-facing text; never contains provider payloads.
    pub fn user_message(&self) -> &'static str {
        self.code().user_message()
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SidestreamError>;
