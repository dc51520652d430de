//! Agent loop behaviour against a scripted backend.

mod common;

use std::sync::Arc;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use sidestream::agent::{
    AgentRequest, ForegroundPolicy, Orchestrator, RunOutcome, RunStatus, FALLBACK_APOLOGY,
};
use sidestream::background::{resume_frames, BackgroundTaskManager, ResumeRequest};
use sidestream::consumer::StreamState;
use sidestream::error::{ErrorCode, SidestreamError};
use sidestream::protocol::{AgentMode, BackgroundFrame, Frame, TaskStatus, ToolResultFrame, ToolUseStatus};
use sidestream::tools::ToolExecutor;
use sidestream::types::{InputItem, ModelMessage};

fn orchestrator(backend: &Arc<MockBackend>) -> Orchestrator {
    Orchestrator::new(backend.clone(), Arc::new(BackgroundTaskManager::new()))
}

fn request(mode: AgentMode, tools: Option<Arc<dyn ToolExecutor>>) -> AgentRequest {
    AgentRequest::builder()
        .request_id("req_1")
        .system_prompt("You are a test assistant.")
        .history(vec![ModelMessage::user("question")])
        .mode(mode)
        .user_id("user_1")
        .maybe_tools(tools)
        .build()
}

async fn run_to_end(orchestrator: &Orchestrator, request: AgentRequest) -> (Vec<Frame>, RunOutcome) {
    let (handle, frames) = orchestrator.spawn(request);
    let frames: Vec<Frame> = frames.collect().await;
    let outcome = handle.wait().await.unwrap();
    (frames, outcome)
}

fn fold(frames: &[Frame]) -> StreamState {
    let mut state = StreamState::new();
    for frame in frames {
        state.apply(frame);
    }
    state
}

fn tool_frames(frames: &[Frame]) -> Vec<Frame> {
    frames
        .iter()
        .filter(|f| matches!(f, Frame::ToolUse(_) | Frame::ToolResult(_)))
        .cloned()
        .collect()
}

fn stage_labels(frames: &[Frame]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Stage(stage) => Some(stage.label.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn simple_chat_streams_content_then_sentinel() {
    let backend = Arc::new(MockBackend::new().events(text_turn(&["Hel", "lo", " world"])));
    let (frames, outcome) = run_to_end(&orchestrator(&backend), request(AgentMode::Chat, None)).await;

    assert!(matches!(frames.first(), Some(Frame::Mode(mode)) if !mode.background_mode));
    assert_eq!(
        frames[1..].to_vec(),
        vec![
            Frame::content("Hel"),
            Frame::content("lo"),
            Frame::content(" world"),
            Frame::Done,
        ]
    );
    let state = fold(&frames);
    assert_eq!(state.content, "Hello world");
    assert!(state.tool_history.is_empty());
    assert!(state.done);

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.text, "Hello world");
    assert!(!outcome.background);
}

#[tokio::test]
async fn first_request_carries_instructions_and_history() {
    let backend = Arc::new(MockBackend::new().events(text_turn(&["ok"])));
    run_to_end(&orchestrator(&backend), request(AgentMode::Chat, None)).await;

    let sent = backend.request(0);
    assert_eq!(sent.instructions, "You are a test assistant.");
    assert_eq!(sent.model, "mock-model");
    assert!(sent.tools.is_none());
    assert_eq!(sent.metadata.get("request_id").map(String::as_str), Some("req_1"));
    assert!(matches!(&sent.input[..], [InputItem::Message(m)] if m.content == "question"));
}

#[tokio::test]
async fn one_tool_round_trip() {
    let backend = Arc::new(
        MockBackend::new()
            .events(tool_turn("call_1", "lookup", json!({"q": "x"})))
            .events(text_turn(&["The answer is 42"])),
    );
    let executor = ScriptedExecutor::answering(&["lookup"], "42").into_arc();
    let request = request(AgentMode::Chat, Some(executor.clone()));

    let (frames, outcome) = run_to_end(&orchestrator(&backend), request).await;

    assert_eq!(
        tool_frames(&frames),
        vec![
            Frame::tool_use("lookup", ToolUseStatus::InProgress, None),
            Frame::tool_use("lookup", ToolUseStatus::Executing, None),
            Frame::ToolResult(ToolResultFrame {
                tool: "lookup".into(),
                success: true,
                output: "42".into(),
            }),
            Frame::tool_use("lookup", ToolUseStatus::Completed, None),
        ]
    );
    assert_eq!(frames.last(), Some(&Frame::Done));

    let batches = executor.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].call_id, "call_1");
    assert_eq!(batches[0][0].arguments, json!({"q": "x"}));

    // The second iteration replays the call and answers it.
    assert_eq!(backend.request_count(), 2);
    let second = backend.request(1);
    assert!(second.tools.is_some());
    assert!(second.input.iter().any(|item| matches!(
        item,
        InputItem::BackendOutput { item } if item["call_id"] == "call_1"
    )));
    assert!(second.input.iter().any(|item| matches!(
        item,
        InputItem::FunctionCallOutput { call_id, output } if call_id == "call_1" && output == "42"
    )));

    let state = fold(&frames);
    assert_eq!(state.content, "The answer is 42");
    assert_eq!(state.tool_history.len(), 1);
    assert_eq!(state.tool_history[0].status, ToolUseStatus::Completed);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.iterations, 2);
}

#[tokio::test]
async fn failed_tool_call_is_reported_and_loop_continues() {
    let backend = Arc::new(
        MockBackend::new()
            .events(tool_turn("call_1", "lookup", json!({})))
            .events(text_turn(&["Could not look that up."])),
    );
    let executor = ScriptedExecutor::failing_calls(&["lookup"], "lookup failed").into_arc();

    let (frames, outcome) =
        run_to_end(&orchestrator(&backend), request(AgentMode::Chat, Some(executor))).await;

    let tools = tool_frames(&frames);
    assert_eq!(
        tools[2..].to_vec(),
        vec![
            Frame::ToolResult(ToolResultFrame {
                tool: "lookup".into(),
                success: false,
                output: "lookup failed".into(),
            }),
            Frame::tool_use("lookup", ToolUseStatus::Error, Some("lookup failed".into())),
        ]
    );
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(fold(&frames).content, "Could not look that up.");
}

#[tokio::test]
async fn tool_batch_failure_ends_the_run() {
    let backend = Arc::new(
        MockBackend::new()
            .events(tool_turn("call_1", "lookup", json!({})))
            .events(text_turn(&["never sent"])),
    );
    let executor = ScriptedExecutor::failing_batch(&["lookup"]).into_arc();

    let (frames, outcome) =
        run_to_end(&orchestrator(&backend), request(AgentMode::Chat, Some(executor))).await;

    let details = Some(ErrorCode::ToolExecution.user_message().to_string());
    assert_eq!(
        tool_frames(&frames).last(),
        Some(&Frame::tool_use("lookup", ToolUseStatus::Error, details))
    );
    assert_eq!(frames.last(), Some(&Frame::Done));
    assert_eq!(backend.request_count(), 1);
    assert_eq!(outcome.status, RunStatus::ToolAborted);
}

#[tokio::test]
async fn iteration_bound_ends_with_apology() {
    let mut backend = MockBackend::new();
    // Ten tool iterations plus the forced-final one, which still asks for a tool.
    for i in 0..11 {
        backend = backend.events(tool_turn(&format!("call_{i}"), "lookup", json!({})));
    }
    let backend = Arc::new(backend);
    let executor = ScriptedExecutor::answering(&["lookup"], "more").into_arc();
    let orchestrator = orchestrator(&backend).with_policy(Arc::new(ForegroundPolicy));

    let (frames, outcome) =
        run_to_end(&orchestrator, request(AgentMode::Agent, Some(executor.clone()))).await;

    assert_eq!(backend.request_count(), 11);
    assert!(backend.request(10).tools.is_none());
    assert_eq!(executor.batch_count(), 10);
    assert_eq!(
        frames[frames.len() - 2..].to_vec(),
        vec![Frame::content(FALLBACK_APOLOGY), Frame::Done]
    );
    assert_eq!(outcome.status, RunStatus::Exhausted);
    assert_eq!(outcome.iterations, 11);
}

#[tokio::test]
async fn empty_iteration_goes_straight_to_final_answer() {
    let backend = Arc::new(
        MockBackend::new()
            .events(vec![completed()])
            .events(text_turn(&["final"])),
    );
    let executor = ScriptedExecutor::answering(&["lookup"], "unused").into_arc();

    let (frames, outcome) =
        run_to_end(&orchestrator(&backend), request(AgentMode::Chat, Some(executor))).await;

    assert_eq!(backend.request_count(), 2);
    assert!(backend.request(0).tools.is_some());
    assert!(backend.request(1).tools.is_none());
    assert_eq!(fold(&frames).content, "final");
    assert_eq!(outcome.status, RunStatus::Completed);
}

#[tokio::test]
async fn backend_error_becomes_error_frame_and_sentinel() {
    let backend = Arc::new(MockBackend::new().script(Script::Reject(SidestreamError::api(500, "upstream exploded"))));

    let (frames, outcome) = run_to_end(&orchestrator(&backend), request(AgentMode::Chat, None)).await;

    assert_eq!(frames.len(), 3);
    match &frames[1] {
        Frame::Error(error) => {
            assert_eq!(error.code, ErrorCode::ServerError);
            assert!(error.retryable);
            assert_eq!(error.request_id.as_deref(), Some("req_1"));
            assert!(!error.message.contains("upstream exploded"));
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(frames[2], Frame::Done);
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.error, Some(ErrorCode::ServerError));
}

#[tokio::test]
async fn in_stream_error_keeps_partial_content() {
    let backend = Arc::new(MockBackend::new().events(vec![
        text("par"),
        sidestream::provider::BackendEvent::new(sidestream::provider::BackendEventKind::Error {
            code: Some("rate_limit_exceeded".into()),
            message: "slow down".into(),
        }),
    ]));

    let (frames, outcome) = run_to_end(&orchestrator(&backend), request(AgentMode::Chat, None)).await;

    let state = fold(&frames);
    assert_eq!(state.content, "par");
    assert_eq!(state.error.as_ref().map(|e| e.code), Some(ErrorCode::RateLimited));
    assert!(state.done);
    assert_eq!(outcome.error, Some(ErrorCode::RateLimited));
}

#[tokio::test]
async fn transport_break_mid_stream_fails_the_run() {
    let backend = Arc::new(MockBackend::new().script(Script::BreakWith(
        vec![text("a")],
        SidestreamError::Stream("connection reset".into()),
    )));

    let (frames, outcome) = run_to_end(&orchestrator(&backend), request(AgentMode::Chat, None)).await;

    assert!(matches!(frames[frames.len() - 2], Frame::Error(_)));
    assert_eq!(frames.last(), Some(&Frame::Done));
    assert_eq!(outcome.status, RunStatus::Failed);
}

#[tokio::test]
async fn research_mode_reports_stages() {
    let backend = Arc::new(
        MockBackend::new()
            .events(tool_turn("call_1", "web_search", json!({"q": "rust"})))
            .events(text_turn(&["Summary"])),
    );
    let executor = ScriptedExecutor::answering(&["web_search"], "results").into_arc();
    let orchestrator = orchestrator(&backend).with_policy(Arc::new(ForegroundPolicy));

    let (frames, _) = run_to_end(&orchestrator, request(AgentMode::Research, Some(executor))).await;

    assert_eq!(stage_labels(&frames), vec!["searching", "analyzing"]);
}

#[tokio::test]
async fn abort_mid_stream_sends_nothing_more() {
    let backend = Arc::new(MockBackend::new().script(Script::Hang(vec![text("one "), text("two ")])));
    let (handle, mut frames) = orchestrator(&backend).spawn(request(AgentMode::Chat, None));

    let mut state = StreamState::new();
    for _ in 0..3 {
        let frame = frames.next().await.unwrap();
        state.apply(&frame);
    }
    handle.abort();

    let rest: Vec<Frame> = frames.collect().await;
    assert!(rest.is_empty());
    assert_eq!(state.content, "one two ");
    assert!(!state.done);

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn background_run_registers_and_reports_status() {
    let backend = Arc::new(MockBackend::new().events(vec![
        created("resp_1", 0),
        in_progress("resp_1", 1),
        text_at("Hi", 2),
        finished_with("resp_1", TaskStatus::Completed, usage(10, 5)).with_sequence(3),
    ]));
    let tasks = Arc::new(BackgroundTaskManager::new());
    let orchestrator = Orchestrator::new(backend.clone(), tasks.clone());
    let executor = ScriptedExecutor::answering(&["lookup"], "unused").into_arc();

    let (frames, outcome) = run_to_end(&orchestrator, request(AgentMode::Agent, Some(executor))).await;

    assert!(matches!(frames.first(), Some(Frame::Mode(mode)) if mode.background_mode));
    assert!(backend.request(0).background);
    assert_eq!(
        frames[1..].to_vec(),
        vec![
            Frame::content("Hi"),
            Frame::BackgroundStatus(BackgroundFrame {
                response_id: "resp_1".into(),
                status: TaskStatus::Completed,
                message: None,
            }),
            Frame::Done,
        ]
    );

    let task = tasks.get("req_1").await.unwrap();
    assert_eq!(task.response_id, "resp_1");
    assert_eq!(task.user_id, "user_1");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.sequence_number, 3);

    assert!(outcome.background);
    assert_eq!(outcome.response_id.as_deref(), Some("resp_1"));
    assert_eq!(outcome.usage.total_tokens, 15);
}

#[tokio::test]
async fn aborting_a_background_run_cancels_the_response() {
    let backend = Arc::new(MockBackend::new().script(Script::Hang(vec![created("resp_9", 0), text_at("a", 1)])));
    let tasks = Arc::new(BackgroundTaskManager::new());
    let orchestrator = Orchestrator::new(backend.clone(), tasks.clone());
    let executor = ScriptedExecutor::answering(&["lookup"], "unused").into_arc();

    let (handle, mut frames) = orchestrator.spawn(request(AgentMode::Agent, Some(executor)));
    assert!(matches!(frames.next().await, Some(Frame::Mode(_))));
    assert_eq!(frames.next().await, Some(Frame::content("a")));
    handle.abort();

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(backend.cancelled.lock().unwrap().clone(), vec!["resp_9".to_string()]);
    assert_eq!(tasks.get("req_1").await.unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn disconnect_leaves_background_response_running() {
    let backend = Arc::new(MockBackend::new().events(vec![
        created("resp_7", 0),
        text_at("a", 1),
        text_at("b", 2),
        text_at("c", 3),
        finished_with("resp_7", TaskStatus::Completed, usage(1, 1)).with_sequence(4),
    ]));
    let tasks = Arc::new(BackgroundTaskManager::new());
    let orchestrator = Orchestrator::new(backend.clone(), tasks.clone()).with_channel_capacity(1);
    let executor = ScriptedExecutor::answering(&["lookup"], "unused").into_arc();

    let (handle, mut frames) = orchestrator.spawn(request(AgentMode::Agent, Some(executor)));
    assert!(matches!(frames.next().await, Some(Frame::Mode(_))));
    assert_eq!(frames.next().await, Some(Frame::content("a")));
    drop(frames);

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Disconnected);
    assert!(backend.cancelled.lock().unwrap().is_empty());
    let task = tasks.get("req_1").await.unwrap();
    assert!(!task.is_terminal());
    assert_eq!(task.sequence_number, 1);
}

#[tokio::test]
async fn resume_after_disconnect_delivers_every_missed_frame() {
    let events = vec![
        created("resp_7", 0),
        text_at("a", 1),
        text_at("b", 2),
        text_at("c", 3),
        finished_with("resp_7", TaskStatus::Completed, usage(1, 1)).with_sequence(4),
    ];
    let backend = Arc::new(MockBackend::new().events(events.clone()).resume_with(events));
    let tasks = Arc::new(BackgroundTaskManager::new());
    let orchestrator = Orchestrator::new(backend.clone(), tasks.clone()).with_channel_capacity(1);
    let executor = ScriptedExecutor::answering(&["lookup"], "unused").into_arc();

    let (handle, mut frames) = orchestrator.spawn(request(AgentMode::Agent, Some(executor)));
    assert!(matches!(frames.next().await, Some(Frame::Mode(_))));
    let mut seen = match frames.next().await {
        Some(Frame::ContentDelta(text)) => text,
        other => panic!("expected content, got {other:?}"),
    };
    drop(frames);
    assert_eq!(handle.wait().await.unwrap().status, RunStatus::Disconnected);

    let resumed: Vec<Frame> = resume_frames(backend.clone(), tasks.clone(), ResumeRequest::new("resp_7"))
        .collect()
        .await;
    for frame in &resumed {
        if let Frame::ContentDelta(text) = frame {
            seen.push_str(text);
        }
    }

    assert_eq!(seen, "abc");
    assert_eq!(resumed.last(), Some(&Frame::Done));
    assert_eq!(
        backend.resumes.lock().unwrap().clone(),
        vec![("resp_7".to_string(), Some(1))]
    );
    let task = tasks.get("req_1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.sequence_number, 4);
}

#[tokio::test]
async fn explicit_receiver_run_uses_given_sink() {
    let backend = Arc::new(MockBackend::new().events(text_turn(&["x"])));
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let outcome = orchestrator(&backend)
        .run(request(AgentMode::Chat, None), tx, tokio_util::sync::CancellationToken::new())
        .await;
    let mut frames = Vec::new();
    while let Some(sequenced) = rx.recv().await {
        assert_eq!(sequenced.cursor, None);
        frames.push(sequenced.frame);
    }
    assert_eq!(frames.last(), Some(&Frame::Done));
    assert_eq!(outcome.status, RunStatus::Completed);
}
