//! CLI entry point for sidestream.

pub mod commands;

use clap::{Parser, Subcommand};

use crate::agent::Complexity;
use crate::protocol::AgentMode;

/// Sidestream CLI
#[derive(Parser, Debug)]
#[command(name = "sidestream", version, about = "Streaming agent runs with resumable background generations")]
pub struct Cli {
    /// Config file (overrides $SIDESTREAM_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one agent turn and stream the answer
    Chat(ChatArgs),
    /// Show the status of a background response
    Status(TaskArgs),
    /// Cancel a background response
    Cancel(TaskArgs),
    /// Re-attach to a background response's stream
    Resume(ResumeArgs),
    /// Poll a background response until it settles
    Wait(TaskArgs),
    /// List a user's active background responses
    List(ListArgs),
    /// Serve the HTTP API
    Serve(ServeArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Agent mode
    #[arg(long, value_enum, default_value_t = ModeArg::Chat)]
    pub mode: ModeArg,

    /// Model override
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Chat id; background runs for a chat are persisted
    #[arg(long)]
    pub chat_id: Option<String>,

    /// User id
    #[arg(long, default_value = "cli")]
    pub user: String,

    /// Treat the request as complex when choosing background execution
    #[arg(long)]
    pub complex: bool,

    /// Print raw frames instead of rendered text
    #[arg(long)]
    pub raw: bool,

    /// User prompt (positional)
    pub prompt: Option<String>,
}

impl ChatArgs {
    pub fn complexity(&self) -> Complexity {
        if self.complex {
            Complexity::Complex
        } else {
            Complexity::Simple
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Chat,
    Agent,
    Research,
}

impl From<ModeArg> for AgentMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Chat => AgentMode::Chat,
            ModeArg::Agent => AgentMode::Agent,
            ModeArg::Research => AgentMode::Research,
        }
    }
}

/// A background response id.
#[derive(Parser, Debug)]
pub struct TaskArgs {
    pub response_id: String,
}

/// Arguments for `sidestream resume`.
#[derive(Parser, Debug)]
pub struct ResumeArgs {
    pub response_id: String,

    /// Skip events up to and including this sequence number
    #[arg(long)]
    pub starting_after: Option<u64>,

    #[arg(long)]
    pub raw: bool,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    #[arg(long, default_value = "cli")]
    pub user: String,
}

/// Arguments for `sidestream serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address (defaults to the configured `listen_addr`)
    #[arg(long)]
    pub addr: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_chat_with_defaults() {
        let cli = Cli::try_parse_from(["sidestream", "chat", "hello"]).unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.mode, ModeArg::Chat);
                assert_eq!(args.user, "cli");
                assert!(args.chat_id.is_none());
                assert_eq!(args.complexity(), Complexity::Simple);
                assert_eq!(args.prompt.as_deref(), Some("hello"));
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_chat_with_all_options() {
        let cli = Cli::try_parse_from([
            "sidestream",
            "chat",
            "--mode",
            "research",
            "-m",
            "gpt-5",
            "-s",
            "Be brief",
            "--chat-id",
            "c1",
            "--complex",
            "Find sources",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(AgentMode::from(args.mode), AgentMode::Research);
                assert_eq!(args.model.as_deref(), Some("gpt-5"));
                assert_eq!(args.system.as_deref(), Some("Be brief"));
                assert_eq!(args.chat_id.as_deref(), Some("c1"));
                assert_eq!(args.complexity(), Complexity::Complex);
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_resume_cursor() {
        let cli =
            Cli::try_parse_from(["sidestream", "resume", "resp_1", "--starting-after", "41"]).unwrap();
        match cli.command {
            Commands::Resume(args) => {
                assert_eq!(args.response_id, "resp_1");
                assert_eq!(args.starting_after, Some(41));
            }
            other => panic!("expected Resume, got {other:?}"),
        }
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["sidestream"]).is_err());
    }

    #[test]
    fn status_requires_response_id() {
        assert!(Cli::try_parse_from(["sidestream", "status"]).is_err());
    }
}
