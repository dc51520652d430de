//! Mode limits and background-mode policy.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::protocol::{AgentMode, Confidence, ModeFrame, ReasoningEffort};

/// Caller-supplied estimate of how demanding a request is.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

/// Tool-calling iterations allowed before the forced final answer.
pub fn max_iterations(mode: AgentMode) -> usize {
    match mode {
        AgentMode::Chat => 3,
        AgentMode::Agent | AgentMode::Research => 10,
    }
}

pub fn default_reasoning_effort(mode: AgentMode) -> ReasoningEffort {
    match mode {
        AgentMode::Chat => ReasoningEffort::Low,
        AgentMode::Agent => ReasoningEffort::Medium,
        AgentMode::Research => ReasoningEffort::High,
    }
}

/// Inputs to the background-mode decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyInput {
    pub mode: AgentMode,
    pub has_tools: bool,
    pub complexity: Complexity,
    pub message_count: usize,
}

/// Decides whether a request runs provider-side in background mode.
pub trait BackgroundPolicy: Send + Sync {
    fn use_background(&self, input: &PolicyInput) -> bool;
}

/// Tool-using agent work always runs in background mode; so does any
/// complex or long conversation.
#[derive(Debug, Clone)]
pub struct DefaultBackgroundPolicy {
    pub long_conversation: usize,
}

impl Default for DefaultBackgroundPolicy {
    fn default() -> Self {
        Self {
            long_conversation: 10,
        }
    }
}

impl BackgroundPolicy for DefaultBackgroundPolicy {
    fn use_background(&self, input: &PolicyInput) -> bool {
        match input.mode {
            AgentMode::Agent | AgentMode::Research if input.has_tools => true,
            AgentMode::Agent => input.message_count > self.long_conversation,
            _ => input.has_tools && input.complexity == Complexity::Complex,
        }
    }
}

/// Never uses background mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForegroundPolicy;

impl BackgroundPolicy for ForegroundPolicy {
    fn use_background(&self, _input: &PolicyInput) -> bool {
        false
    }
}

/// Resolved mode for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelection {
    pub mode: AgentMode,
    pub reason: String,
    pub confidence: Confidence,
    pub reasoning_effort: ReasoningEffort,
    pub background: bool,
}

impl ModeSelection {
    pub fn max_iterations(&self) -> usize {
        max_iterations(self.mode)
    }

    pub fn to_frame(&self) -> ModeFrame {
        ModeFrame {
            kind: self.mode,
            reason: self.reason.clone(),
            confidence: self.confidence,
            reasoning_effort: self.reasoning_effort,
            background_mode: self.background,
        }
    }
}
