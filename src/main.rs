//! Sidestream CLI binary entry point.

use clap::Parser;
use sidestream::cli::commands::{self, Runtime};
use sidestream::cli::{Cli, Commands};
use sidestream::config::SidestreamConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sidestream=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), sidestream::error::SidestreamError> {
    let config = SidestreamConfig::load_from(cli.config)?;
    let runtime = Runtime::bootstrap(config).await?;

    match cli.command {
        Commands::Chat(args) => commands::handle_chat(&runtime, args).await,
        Commands::Status(args) => commands::handle_status(&runtime, args).await,
        Commands::Cancel(args) => commands::handle_cancel(&runtime, args).await,
        Commands::Resume(args) => commands::handle_resume(&runtime, args).await,
        Commands::Wait(args) => commands::handle_wait(&runtime, args).await,
        Commands::List(args) => commands::handle_list(&runtime, args).await,
        Commands::Serve(args) => commands::handle_serve(&runtime, args).await,
    }
}
