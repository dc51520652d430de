//! Unified error classification.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Machine-readable error code carried by `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    RateLimited,
    Overloaded,
    ServerError,
    Timeout,
    Auth,
    Quota,
    ToolExecution,
    PollTimeout,
    NotFound,
    Unknown,
}

impl ErrorCode {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Overloaded | Self::ServerError | Self::Timeout
        )
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::Validation => "The request was invalid and could not be processed.",
            Self::RateLimited => "Too many requests right now. Please try again in a moment.",
            Self::Overloaded => "The service is busy. Please try again shortly.",
            Self::ServerError => "Something went wrong while generating a response.",
            Self::Timeout => "The response took too long. Please try again.",
            Self::Auth => "The service could not authenticate this request.",
            Self::Quota => "The usage quota for this account has been reached.",
            Self::ToolExecution => "A tool failed while working on this request.",
            Self::PollTimeout => "The background task did not finish in time.",
            Self::NotFound => "The requested item was not found.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input or missing resource; the caller must change the request.
    Client,
    /// Credentials or billing; the user must act.
    Account,
    /// Worth retrying with backoff.
    Transient,
    Tool,
    Background,
    Internal,
}

/// Structured details returned by a provider API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub provider_code: Option<String>,
    pub request_id: Option<String>,
}

pub(crate) fn code_for_status(status: u16, provider_code: Option<&str>, message: &str) -> ErrorCode {
    if provider_code == Some("insufficient_quota") || message.contains("insufficient_quota") {
        return ErrorCode::Quota;
    }
    match status {
        400 | 409 | 413 | 422 => ErrorCode::Validation,
        401 | 403 => ErrorCode::Auth,
        402 => ErrorCode::Quota,
        404 => ErrorCode::NotFound,
        408 => ErrorCode::Timeout,
        429 => ErrorCode::RateLimited,
        503 | 529 => ErrorCode::Overloaded,
        500..=599 => ErrorCode::ServerError,
        _ => ErrorCode::Unknown,
    }
}
