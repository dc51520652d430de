//! Token usage accounting.

use serde::{Deserialize, Serialize};

/// Token usage for one or more backend calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(v) = other.cached_input_tokens {
            *self.cached_input_tokens.get_or_insert(0) += v;
        }
        if let Some(v) = other.reasoning_tokens {
            *self.reasoning_tokens.get_or_insert(0) += v;
        }
    }

    /// Parse the Responses API `usage` object.
    pub fn from_response_json(value: &serde_json::Value) -> Option<Self> {
        let input_tokens = value.get("input_tokens")?.as_u64()? as u32;
        let output_tokens = value.get("output_tokens")?.as_u64()? as u32;
        let total_tokens = value
            .get("total_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(input_tokens + output_tokens);
        Some(Self {
            input_tokens,
            output_tokens,
            total_tokens,
            cached_input_tokens: value
                .pointer("/input_tokens_details/cached_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            reasoning_tokens: value
                .pointer("/output_tokens_details/reasoning_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
        })
    }
}
