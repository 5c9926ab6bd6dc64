//! Taskforge CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Initialize configuration
//! - `run`     — Execute one agent run for a task
//! - `tools`   — List the built-in tools

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "taskforge",
    about = "Taskforge — autonomous multi-step agent runner",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Run the agent on a task
    Run {
        /// The task to carry out
        task: String,

        /// Override the model
        #[arg(short, long)]
        model: Option<String>,

        /// Override the step budget
        #[arg(long)]
        max_steps: Option<u32>,

        /// Disable the up-front planning call
        #[arg(long)]
        no_plan: bool,
    },

    /// List the built-in tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Run {
            task,
            model,
            max_steps,
            no_plan,
        } => commands::run::run(task, model, max_steps, no_plan).await?,
        Commands::Tools => commands::tools::run().await?,
    }

    Ok(())
}
