//! maistro CLI: the main entry point.
//!
//! Commands:
//! - `chat`    : Interactive or single-message chat with the assistant
//! - `tools`   : List the tools offered by configured tool servers
//! - `memory`  : Print stored to-dos or instructions
//! - `onboard` : Write a default config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "maistro",
    about = "maistro: a task management assistant with long-term memory",
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
    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        #[command(flatten)]
        scope: commands::Scope,
    },

    /// Connect the configured tool servers and list their tools
    Tools,

    /// Print what the assistant remembers
    Memory {
        #[command(subcommand)]
        kind: MemoryKind,
    },

    /// Initialize configuration
    Onboard,
}

#[derive(Subcommand)]
enum MemoryKind {
    /// The to-do list
    Todos {
        #[command(flatten)]
        scope: commands::Scope,
    },

    /// The user's preferences for the to-do list
    Instructions {
        #[command(flatten)]
        scope: commands::Scope,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat { message, scope } => commands::chat::run(message, scope).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Memory { kind } => match kind {
            MemoryKind::Todos { scope } => commands::memory::todos(scope).await?,
            MemoryKind::Instructions { scope } => commands::memory::instructions(scope).await?,
        },
        Commands::Onboard => commands::onboard::run().await?,
    }

    Ok(())
}
