//! CLI command handlers.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::agent::{AgentRequest, Orchestrator, RunStatus};
use crate::background::{BackgroundTaskManager, FileTaskStore, ResumeRequest, TaskService};
use crate::config::SidestreamConfig;
use crate::error::SidestreamError;
use crate::protocol::{encode_frame, Frame, ToolUseStatus};
use crate::provider::openai_responses::OpenAiResponsesBackend;
use crate::provider::CompletionBackend;
use crate::types::ModelMessage;

use super::{ChatArgs, ListArgs, ResumeArgs, ServeArgs, TaskArgs};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const PREVIEW_CHARS: usize = 200;

/// Backend, task manager and config shared by every command.
pub struct Runtime {
    pub config: SidestreamConfig,
    pub backend: Arc<dyn CompletionBackend>,
    pub tasks: Arc<BackgroundTaskManager>,
}

impl Runtime {
    /// Build the runtime from config and reload persisted tasks.
    pub async fn bootstrap(config: SidestreamConfig) -> Result<Self, SidestreamError> {
        let backend: Arc<dyn CompletionBackend> = Arc::new(OpenAiResponsesBackend::from_config(&config)?);
        let store = Arc::new(FileTaskStore::new(config.resolved_state_dir()));
        let tasks = Arc::new(BackgroundTaskManager::from_config(&config, Some(store)));
        let restored = tasks.restore().await?;
        let expired = tasks.cleanup().await;
        debug!(restored, expired, "background tasks loaded");
        Ok(Self { config, backend, tasks })
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(Arc::clone(&self.backend), Arc::clone(&self.tasks))
    }

    fn service(&self) -> TaskService {
        TaskService::new(Arc::clone(&self.backend), Arc::clone(&self.tasks))
    }
}

/// Handle `sidestream chat`.
pub async fn handle_chat(runtime: &Runtime, args: ChatArgs) -> Result<(), SidestreamError> {
    let complexity = args.complexity();
    let Some(prompt) = args.prompt else {
        return Err(SidestreamError::validation("usage: sidestream chat \"your prompt here\""));
    };

    let request = AgentRequest::builder()
        .system_prompt(args.system.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()))
        .history(vec![ModelMessage::user(prompt)])
        .mode(args.mode.into())
        .user_id(args.user)
        .maybe_chat_id(args.chat_id)
        .maybe_model(args.model)
        .complexity(complexity)
        .build();
    request.validate()?;

    let (handle, frames) = runtime.orchestrator().spawn(request);
    let cancel = handle.cancellation_token();
    let render = render_frames(frames, args.raw);
    tokio::pin!(render);
    tokio::select! {
        _ = &mut render => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\ninterrupted");
            cancel.cancel();
        }
    }

    let outcome = handle.wait().await?;
    runtime.tasks.flush().await;
    info!(
        request_id = %outcome.request_id,
        status = %outcome.status,
        iterations = outcome.iterations,
        "chat finished"
    );
    match (outcome.status, outcome.error) {
        (RunStatus::Failed, Some(code)) => Err(SidestreamError::Stream(format!("run failed: {code}"))),
        _ => Ok(()),
    }
}

/// Handle `sidestream status <id>`.
pub async fn handle_status(runtime: &Runtime, args: TaskArgs) -> Result<(), SidestreamError> {
    let report = runtime.service().status(&args.response_id).await?;
    runtime.tasks.flush().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Handle `sidestream cancel <id>`.
pub async fn handle_cancel(runtime: &Runtime, args: TaskArgs) -> Result<(), SidestreamError> {
    let report = runtime.service().cancel(&args.response_id).await?;
    runtime.tasks.flush().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Handle `sidestream resume <id>`.
pub async fn handle_resume(runtime: &Runtime, args: ResumeArgs) -> Result<(), SidestreamError> {
    let request = ResumeRequest {
        response_id: args.response_id,
        starting_after: args.starting_after,
    };
    render_frames(runtime.service().resume(request), args.raw).await;
    runtime.tasks.flush().await;
    Ok(())
}

/// Handle `sidestream wait <id>`.
pub async fn handle_wait(runtime: &Runtime, args: TaskArgs) -> Result<(), SidestreamError> {
    let snapshot = runtime
        .service()
        .wait(&args.response_id, &runtime.config.poll, |status| {
            eprintln!("status: {status}");
        })
        .await;
    runtime.tasks.flush().await;
    let snapshot = snapshot?;
    if let Some(text) = &snapshot.output_text {
        println!("{text}");
    }
    if let Some(error) = &snapshot.error {
        eprintln!("error: {error}");
    }
    Ok(())
}

/// Handle `sidestream list`.
pub async fn handle_list(runtime: &Runtime, args: ListArgs) -> Result<(), SidestreamError> {
    let tasks = runtime.service().list_active(&args.user).await;
    println!("{}", serde_json::to_string_pretty(&tasks)?);
    Ok(())
}

/// Handle `sidestream serve`.
pub async fn handle_serve(runtime: &Runtime, args: ServeArgs) -> Result<(), SidestreamError> {
    let addr = args.addr.unwrap_or_else(|| runtime.config.listen_addr.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let tasks = Arc::clone(&runtime.tasks);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            tasks.cleanup().await;
        }
    });

    let state = crate::server::AppState {
        orchestrator: runtime.orchestrator(),
        service: runtime.service(),
        tools: None,
        system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
    };
    crate::server::serve(listener, state).await
}

async fn render_frames<S>(frames: S, raw: bool)
where
    S: Stream<Item = Frame>,
{
    futures::pin_mut!(frames);
    let mut stdout = std::io::stdout();
    while let Some(frame) = frames.next().await {
        if raw {
            let _ = stdout.write_all(encode_frame(&frame).as_bytes());
            let _ = stdout.flush();
            continue;
        }
        match &frame {
            Frame::ContentDelta(text) => {
                print!("{text}");
                let _ = stdout.flush();
            }
            Frame::ReasoningDelta(_) => {}
            Frame::ToolUse(tool) => match tool.status {
                ToolUseStatus::Error => eprintln!("\n! {} failed", tool.tool),
                status => eprintln!("\n> {} {status}", tool.tool),
            },
            Frame::ToolResult(result) => {
                let mark = if result.success { "ok" } else { "err" };
                eprintln!("  {mark}: {}", preview(&result.output));
            }
            Frame::GeneratedArtifact(artifact) => {
                eprintln!("\n[artifact] {}", artifact.caption.as_deref().unwrap_or("generated image"));
            }
            Frame::Mode(mode) if mode.background_mode => {
                eprintln!("[{}] running in background", mode.kind);
            }
            Frame::Mode(_) => {}
            Frame::BackgroundStatus(background) => {
                eprintln!("\n[background] {} {}", background.response_id, background.status);
            }
            Frame::Stage(stage) => eprintln!("[{}]", stage.label),
            Frame::Sources(sources) => {
                for source in sources {
                    eprintln!("  source: {}", source.url);
                }
            }
            Frame::Error(error) => {
                warn!(code = %error.code, "stream reported an error");
                eprintln!("\nerror: {}", error.message);
            }
            Frame::Done => println!(),
        }
    }
}

fn preview(output: &str) -> String {
    if output.chars().count() <= PREVIEW_CHARS {
        return output.to_string();
    }
    let truncated: String = output.chars().take(PREVIEW_CHARS).collect();
    format!("{truncated}...")
}
