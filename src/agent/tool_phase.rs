use tracing::{debug, warn};

use crate::protocol::{Frame, ToolResultFrame, ToolUseStatus};
use crate::types::{InputItem, PendingToolCall, ToolCall, ToolOutcome};

use super::engine::{Finish, Run, RunState};

const NO_RESULT: &str = "Tool returned no result";
const NO_EXECUTOR: &str = "No tools are available for this request";

impl Run<'_> {
    /// Run every pending call as one batch, report results, and fold them
    /// into the next iteration's input.
    pub(super) async fn tool_phase(&mut self, calls: Vec<PendingToolCall>) -> RunState {
        let tool_calls: Vec<ToolCall> = calls.iter().map(PendingToolCall::to_call).collect();
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        debug!(
            request_id = %self.request.request_id,
            iteration = self.iteration,
            tools = ?names,
            "executing tool calls"
        );

        let mut frames = Vec::with_capacity(calls.len() + 1);
        if self.is_research() {
            frames.push(Frame::stage("searching", Some(names.join(", "))));
        }
        frames.extend(
            calls
                .iter()
                .map(|c| Frame::tool_use(c.name.clone(), ToolUseStatus::Executing, None)),
        );
        if let Err(halt) = self.emit_all(frames).await {
            return RunState::Finalizing(halt.into());
        }

        let outcomes = match self.request.tools.clone() {
            Some(executor) => {
                let request_id = self.request.request_id.as_str();
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return RunState::Finalizing(Finish::Cancelled),
                    result = executor.execute(tool_calls.clone(), Some(request_id)) => result,
                };
                match result {
                    Ok(outcomes) => outcomes,
                    Err(err) => {
                        warn!(
                            request_id = %self.request.request_id,
                            iteration = self.iteration,
                            error = %err,
                            "tool batch failed; ending run"
                        );
                        let details = Some(err.user_message().to_string());
                        let frames = calls
                            .iter()
                            .map(|c| Frame::tool_use(c.name.clone(), ToolUseStatus::Error, details.clone()))
                            .collect();
                        if let Err(halt) = self.emit_all(frames).await {
                            return RunState::Finalizing(halt.into());
                        }
                        return RunState::Finalizing(Finish::ToolAborted);
                    }
                }
            }
            None => tool_calls
                .iter()
                .map(|call| ToolOutcome::failure(call, NO_EXECUTOR))
                .collect(),
        };

        let ordered: Vec<ToolOutcome> = tool_calls
            .iter()
            .map(|call| {
                outcomes
                    .iter()
                    .find(|o| o.call_id == call.call_id)
                    .cloned()
                    .unwrap_or_else(|| ToolOutcome::failure(call, NO_RESULT))
            })
            .collect();

        let mut frames = Vec::with_capacity(ordered.len() * 2 + 1);
        for outcome in &ordered {
            frames.push(Frame::ToolResult(ToolResultFrame {
                tool: outcome.name.clone(),
                success: outcome.success,
                output: outcome.output.clone(),
            }));
            let (status, details) = if outcome.success {
                (ToolUseStatus::Completed, None)
            } else {
                (ToolUseStatus::Error, Some(outcome.output.clone()))
            };
            frames.push(Frame::tool_use(outcome.name.clone(), status, details));
        }
        if self.is_research() {
            let succeeded = ordered.iter().filter(|o| o.success).count();
            frames.push(Frame::stage(
                "analyzing",
                Some(format!("{succeeded} of {} results", ordered.len())),
            ));
        }
        if let Err(halt) = self.emit_all(frames).await {
            return RunState::Finalizing(halt.into());
        }

        let replay = self.translator.replay_items(&calls);
        self.input
            .extend(replay.into_iter().map(|item| InputItem::BackendOutput { item }));
        self.input.extend(ordered.iter().map(InputItem::from));
        RunState::Requesting
    }
}
