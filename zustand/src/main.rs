//! Zustand - inspect the execution history of incremental builds
//!
//! Reads the history written by `convenient-history` and answers:
//! 1. What was recorded for a task (`show`, `list`)
//! 2. What changed on disk since then (`diff`)
//! 3. Forget a task so its next execution starts from scratch (`forget`)

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zustand=info,convenient_history=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    tracing::debug!("History directory: {}", config.root.display());

    match cli.command {
        Commands::Show { task, json } => commands::show::execute(&config, &task, json).await,
        Commands::Diff {
            task,
            inputs,
            outputs,
            normalization,
        } => commands::diff::execute(&config, &task, &inputs, &outputs, normalization).await,
        Commands::Forget { task } => commands::forget::execute(&config, &task).await,
        Commands::List => commands::list::execute(&config).await,
    }
}
