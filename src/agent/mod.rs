//! Agent loop: bounded iterate-call-tools-until-text control flow.

mod backend_phase;
mod engine;
pub mod mode;
mod orchestrator;
mod request;
mod tool_phase;
pub(crate) mod translate;

pub use engine::FALLBACK_APOLOGY;
pub use mode::{
    BackgroundPolicy, Complexity, DefaultBackgroundPolicy, ForegroundPolicy, ModeSelection, PolicyInput,
};
pub use orchestrator::{AgentHandle, Orchestrator, RunOutcome, RunStatus};
pub use request::AgentRequest;
