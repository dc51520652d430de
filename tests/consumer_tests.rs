//! Stream consumer folding, termination and resumption.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use pretty_assertions::assert_eq;

use common::*;
use sidestream::background::{resume_frames, BackgroundTaskManager, ResumeRequest};
use sidestream::consumer::{FinalizedMessage, StreamConsumer, StreamState};
use sidestream::error::ErrorCode;
use sidestream::protocol::{encode_frame, ErrorFrame, Frame, TaskStatus, ToolUseStatus};
use sidestream::provider::BackendEvent;

fn consumer() -> StreamConsumer {
    StreamConsumer::new(Duration::ZERO)
}

fn comparable(state: &StreamState) -> FinalizedMessage {
    let mut message = state.finalize();
    message.thinking_time_seconds = None;
    message
}

fn background_log(response_id: &str) -> Vec<BackendEvent> {
    vec![
        created(response_id, 0),
        in_progress(response_id, 1),
        text_at("Hel", 2),
        text_at("lo", 3),
        text_at(" wor", 4),
        text_at("ld", 5),
        finished_with(response_id, TaskStatus::Completed, usage(3, 4)).with_sequence(6),
    ]
}

#[tokio::test]
async fn frames_after_sentinel_are_unobserved() {
    let frames = stream::iter(vec![
        Frame::content("kept"),
        Frame::Done,
        Frame::content(" dropped"),
        Frame::Error(ErrorFrame {
            code: ErrorCode::ServerError,
            message: "late".into(),
            retryable: true,
            request_id: None,
        }),
    ]);
    let state = consumer().consume_frames(frames, StreamState::new(), |_| {}).await;
    assert_eq!(state.content, "kept");
    assert!(state.error.is_none());
    assert!(state.done);
}

#[tokio::test]
async fn error_frame_is_terminal_except_for_sentinel() {
    let frames = stream::iter(vec![
        Frame::content("partial"),
        Frame::Error(ErrorFrame {
            code: ErrorCode::RateLimited,
            message: "Too many requests".into(),
            retryable: true,
            request_id: Some("req_1".into()),
        }),
        Frame::content(" more"),
        Frame::Done,
    ]);
    let state = consumer().consume_frames(frames, StreamState::new(), |_| {}).await;
    let message = state.finalize();
    assert_eq!(message.content, "partial");
    assert_eq!(message.error.map(|e| e.code), Some(ErrorCode::RateLimited));
    assert!(message.completed);
}

#[tokio::test]
async fn closed_connection_without_sentinel_is_not_completed() {
    let frames = stream::iter(vec![Frame::content("a"), Frame::content("b")]);
    let state = consumer().consume_frames(frames, StreamState::new(), |_| {}).await;
    assert_eq!(state.content, "ab");
    assert!(!state.done);
    assert!(!state.finalize().completed);
}

#[tokio::test]
async fn resuming_from_a_cursor_matches_full_consumption() {
    let backend = Arc::new(MockBackend::new().resume_with(background_log("resp_1")));
    let tasks = Arc::new(BackgroundTaskManager::new());

    let full = consumer()
        .consume_frames(
            resume_frames(backend.clone(), tasks.clone(), ResumeRequest::new("resp_1")),
            StreamState::new(),
            |_| {},
        )
        .await;
    assert_eq!(full.content, "Hello world");
    assert!(full.done);

    // A client that saw events up to sequence 3 before the connection dropped.
    let interrupted = consumer()
        .consume_frames(
            stream::iter(vec![Frame::content("Hel"), Frame::content("lo")]),
            StreamState::new(),
            |_| {},
        )
        .await;
    assert!(!interrupted.done);

    let resumed = consumer()
        .consume_frames(
            resume_frames(
                backend.clone(),
                tasks,
                ResumeRequest::new("resp_1").starting_after(3),
            ),
            interrupted,
            |_| {},
        )
        .await;

    assert_eq!(comparable(&resumed), comparable(&full));
    assert_eq!(
        backend.resumes.lock().unwrap().last().cloned(),
        Some(("resp_1".to_string(), Some(3)))
    );
}

#[tokio::test]
async fn resume_reports_background_status_before_sentinel() {
    let backend = Arc::new(MockBackend::new().resume_with(background_log("resp_1")));
    let tasks = Arc::new(BackgroundTaskManager::new());
    let state = consumer()
        .consume_frames(
            resume_frames(backend, tasks, ResumeRequest::new("resp_1").starting_after(5)),
            StreamState::new(),
            |_| {},
        )
        .await;
    assert_eq!(state.content, "");
    assert_eq!(
        state.background.as_ref().map(|b| b.status),
        Some(TaskStatus::Completed)
    );
    assert!(state.done);
}

#[tokio::test]
async fn wire_bytes_fold_into_the_same_state() {
    let frames = vec![
        Frame::content("Hi "),
        Frame::tool_use("lookup", ToolUseStatus::InProgress, None),
        Frame::tool_use("lookup", ToolUseStatus::Completed, None),
        Frame::content("there"),
        Frame::Done,
    ];
    let wire: String = frames.iter().map(encode_frame).collect();
    // Unknown payloads are skipped by the decoder.
    let wire = format!("data: {{\"heartbeat\":true}}\n\n{wire}");
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        wire.as_bytes().chunks(7).map(|c| Ok(c.to_vec())).collect();

    let from_bytes = consumer()
        .consume_bytes(stream::iter(chunks), StreamState::new(), |_| {})
        .await;
    let from_frames = consumer()
        .consume_frames(stream::iter(frames), StreamState::new(), |_| {})
        .await;
    assert_eq!(comparable(&from_bytes), comparable(&from_frames));
    assert_eq!(from_bytes.tool_history.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn status_frames_bypass_the_throttle() {
    let frames = stream::iter(vec![
        Frame::content("a"),
        Frame::tool_use("lookup", ToolUseStatus::Executing, None),
        Frame::content("b"),
        Frame::Done,
    ]);
    let mut seen = Vec::new();
    StreamConsumer::new(Duration::from_millis(50))
        .consume_frames(frames, StreamState::new(), |s| {
            seen.push((s.content.clone(), s.active_tool.is_some(), s.done));
        })
        .await;
    assert_eq!(
        seen,
        vec![
            ("a".to_string(), false, false),
            ("a".to_string(), true, false),
            ("ab".to_string(), false, true),
        ]
    );
}
