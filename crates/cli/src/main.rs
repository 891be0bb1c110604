//! kbchat CLI
//!
//! Main entry point for the kbchat command-line tool.
//! Serves the knowledge-base query handler and the browser chat UI, and
//! offers one-shot questions and history maintenance from the terminal.

mod commands;
mod serve;

use clap::{Parser, Subcommand};
use commands::{AskCommand, HandlerCommand, HistoryCommand, UiCommand};
use kbchat_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// kbchat - chat over a hosted knowledge base
#[derive(Parser, Debug)]
#[command(name = "kbchat")]
#[command(about = "Retrieval-augmented chat over a hosted knowledge base", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "KBCHAT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "KBCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// AWS region of the knowledge base and tables
    #[arg(long, global = true)]
    region: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the query handler over HTTP
    Handler(HandlerCommand),

    /// Serve the browser chat UI
    Ui(UiCommand),

    /// Ask a single question
    Ask(AskCommand),

    /// List, show or delete stored conversations
    History(HistoryCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load configuration: defaults, config file, environment
    let config = AppConfig::load_from(cli.workspace.clone(), cli.config.clone())?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.workspace,
        cli.region,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color, config.log_json)?;

    tracing::info!("kbchat starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Region: {}", config.region);
    tracing::debug!("Storage: {:?}", config.storage.backend);

    let command_name = match &cli.command {
        Commands::Handler(_) => "handler",
        Commands::Ui(_) => "ui",
        Commands::Ask(_) => "ask",
        Commands::History(_) => "history",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Handler(cmd) => cmd.execute(&config).await,
        Commands::Ui(cmd) => cmd.execute(&config).await,
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::History(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
