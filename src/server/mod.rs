//! HTTP surface: streaming chat, background resume, status and cancel.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use crate::agent::{AgentRequest, Complexity, Orchestrator};
use crate::background::{BackgroundTask, ResumeRequest, SequencedFrame, TaskService, TaskStatusReport};
use crate::error::{ErrorCode, SidestreamError};
use crate::protocol::{frame_payload, AgentMode, ErrorFrame, ReasoningEffort};
use crate::tools::ToolExecutor;
use crate::types::ModelMessage;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub service: TaskService,
    pub tools: Option<Arc<dyn ToolExecutor>>,
    /// Used when a chat request carries no system prompt of its own.
    pub system_prompt: String,
}

/// Body of `POST /v1/chat`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ModelMessage>,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub complexity: Complexity,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    starting_after: Option<u64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/background", get(list_active))
        .route("/v1/background/{id}", get(status))
        .route("/v1/background/{id}/cancel", post(cancel))
        .route("/v1/background/{id}/stream", get(resume))
        .with_state(state)
}

/// Serve `router(state)` until the listener fails.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), SidestreamError> {
    let addr = listener.local_addr()?;
    info!(%addr, "sidestream server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "sidestream" }))
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Result<Response, ApiError> {
    let request = AgentRequest::builder()
        .system_prompt(body.system_prompt.unwrap_or_else(|| state.system_prompt.clone()))
        .history(body.messages)
        .mode(body.mode)
        .user_id(body.user_id.unwrap_or_else(|| "anonymous".to_string()))
        .maybe_chat_id(body.chat_id)
        .maybe_model(body.model)
        .maybe_reasoning_effort(body.reasoning_effort)
        .complexity(body.complexity)
        .maybe_tools(state.tools.clone())
        .build();
    request.validate()?;

    let (_handle, frames) = state.orchestrator.spawn_sequenced(request);
    Ok(frame_sse(frames).into_response())
}

async fn list_active(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<BackgroundTask>> {
    Json(state.service.list_active(&query.user_id).await)
}

async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusReport>, ApiError> {
    Ok(Json(state.service.status(&id).await?))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusReport>, ApiError> {
    Ok(Json(state.service.cancel(&id).await?))
}

/// `starting_after` wins over a reconnecting client's `Last-Event-ID`.
async fn resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let starting_after = query.starting_after.or_else(|| last_event_id(&headers));
    let request = ResumeRequest {
        response_id: id,
        starting_after,
    };
    frame_sse(state.service.resume_sequenced(request)).into_response()
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// One SSE `data:` event per frame; the sentinel is sent as `[DONE]`.
/// Frames that complete a background event carry its sequence number as
/// the event `id`.
fn frame_sse<S>(frames: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = SequencedFrame> + Send + 'static,
{
    let events = frames.map(|sequenced| {
        let event = Event::default().data(frame_payload(&sequenced.frame));
        Ok(match sequenced.sequence_number() {
            Some(seq) => event.id(seq.to_string()),
            None => event,
        })
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// JSON error body carrying the same fields as an `error` frame.
pub struct ApiError(SidestreamError);

impl From<SidestreamError> for ApiError {
    fn from(err: SidestreamError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match (&self.0, self.0.code()) {
            (SidestreamError::InvalidState(_), _) => StatusCode::CONFLICT,
            (_, ErrorCode::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorCode::Auth) => StatusCode::UNAUTHORIZED,
            (_, ErrorCode::Quota) => StatusCode::PAYMENT_REQUIRED,
            (_, ErrorCode::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorCode::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            (_, ErrorCode::Timeout) | (_, ErrorCode::PollTimeout) => StatusCode::GATEWAY_TIMEOUT,
            (_, ErrorCode::Overloaded) => StatusCode::SERVICE_UNAVAILABLE,
            (_, ErrorCode::ServerError) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::debug!(status = %status, error = %self.0, "request failed");
        let body = ErrorFrame::from_error(&self.0, None);
        (status, Json(json!({ "error": body }))).into_response()
    }
}
