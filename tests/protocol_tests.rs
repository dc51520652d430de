//! Wire format of the frame protocol.

use pretty_assertions::assert_eq;
use serde_json::json;

use sidestream::error::ErrorCode;
use sidestream::protocol::{
    decode_line, encode_frame, AgentMode, BackgroundFrame, Confidence, ErrorFrame, Frame, FrameDecoder,
    ModeFrame, ReasoningEffort, TaskStatus, ToolUseStatus,
};

#[test]
fn content_delta_wire_unit() {
    assert_eq!(
        encode_frame(&Frame::content("Hel")),
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"
    );
    assert_eq!(encode_frame(&Frame::Done), "data: [DONE]\n\n");
}

#[test]
fn payload_shapes() {
    let tool = Frame::tool_use("lookup", ToolUseStatus::InProgress, None);
    assert_eq!(
        tool.to_json().unwrap(),
        json!({"tool_use": {"tool": "lookup", "status": "in_progress"}})
    );

    let mode = Frame::Mode(ModeFrame {
        kind: AgentMode::Research,
        reason: "research mode requested".into(),
        confidence: Confidence::High,
        reasoning_effort: ReasoningEffort::High,
        background_mode: true,
    });
    assert_eq!(
        mode.to_json().unwrap(),
        json!({"mode": {
            "type": "research",
            "reason": "research mode requested",
            "confidence": "high",
            "reasoningEffort": "high",
            "backgroundMode": true
        }})
    );

    let background = Frame::BackgroundStatus(BackgroundFrame {
        response_id: "resp_1".into(),
        status: TaskStatus::InProgress,
        message: None,
    });
    assert_eq!(
        background.to_json().unwrap(),
        json!({"background": {"responseId": "resp_1", "status": "in_progress"}})
    );

    let error = Frame::Error(ErrorFrame {
        code: ErrorCode::RateLimited,
        message: "Too many requests".into(),
        retryable: true,
        request_id: Some("req_1".into()),
    });
    assert_eq!(
        error.to_json().unwrap(),
        json!({"error": {
            "type": "rate_limited",
            "message": "Too many requests",
            "retryable": true,
            "requestId": "req_1"
        }})
    );
}

#[test]
fn unknown_error_codes_decode_leniently() {
    let frame = decode_line(r#"data: {"error":{"type":"brand_new_code","message":"x"}}"#).unwrap();
    match frame {
        Frame::Error(error) => {
            assert_eq!(error.code, ErrorCode::Unknown);
            assert!(!error.retryable);
        }
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[test]
fn unknown_keys_and_comments_are_ignored() {
    assert_eq!(decode_line(": keep-alive"), None);
    assert_eq!(decode_line("event: message"), None);
    assert_eq!(decode_line(r#"data: {"usage":{"tokens":3}}"#), None);
    assert_eq!(
        decode_line(r#"data: {"choices":[{"delta":{"content":"x"}}],"extra":1}"#),
        Some(Frame::content("x"))
    );
}

#[test]
fn decoder_preserves_order_across_chunks() {
    let frames = vec![
        Frame::content("one"),
        Frame::reasoning("thinking"),
        Frame::content("two"),
        Frame::stage("searching", None),
        Frame::content("three"),
        Frame::Done,
    ];
    let wire: String = frames.iter().map(encode_frame).collect();
    let mut decoder = FrameDecoder::new();
    let mut decoded = Vec::new();
    for chunk in wire.as_bytes().chunks(5) {
        decoded.extend(decoder.push(chunk));
    }
    assert_eq!(decoder.finish(), None);
    assert_eq!(decoded, frames);
}
