//! Sidestream: a streaming agent loop with resumable background generations.
//!
//! An [`Orchestrator`](agent::Orchestrator) drives a bounded
//! model/tool loop against a [`CompletionBackend`](provider::CompletionBackend)
//! and emits [`Frame`](protocol::Frame)s over an SSE-style wire format.
//! Long runs can execute as provider-side background responses, tracked by a
//! [`BackgroundTaskManager`](background::BackgroundTaskManager) so a client
//! can reconnect and resume from its last sequence number.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use sidestream::prelude::*;
//! use sidestream::provider::openai_responses::OpenAiResponsesBackend;
//!
//! # async fn example() -> sidestream::error::Result<()> {
//! let config = SidestreamConfig::load()?;
//! let backend = Arc::new(OpenAiResponsesBackend::from_config(&config)?);
//! let orchestrator = Orchestrator::new(backend, Arc::new(BackgroundTaskManager::new()));
//!
//! let request = AgentRequest::builder()
//!     .system_prompt("You are terse.")
//!     .history(vec![ModelMessage::user("Hello!")])
//!     .build();
//! let (handle, mut frames) = orchestrator.spawn(request);
//! while let Some(frame) = frames.next().await {
//!     if let Frame::ContentDelta(text) = frame {
//!         print!("{text}");
//!     }
//! }
//! handle.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod background;
pub mod config;
pub mod consumer;
pub mod error;
pub mod prelude;
pub mod protocol;
pub mod provider;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;
