//! Core types shared by the orchestrator and its collaborators.

pub mod message;
pub mod usage;

pub use message::*;
pub use usage::*;
