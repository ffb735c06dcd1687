//! toolflow CLI entry point.
//!
//! Commands:
//! - `init`       : Write a default config file
//! - `serve`      : Start the HTTP / SSE / WebSocket gateway
//! - `ask`        : Run one query and print its event stream
//! - `tools`      : List the registered tools
//! - `strategies` : List tool and protocol filter strategies

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod builtin;
mod commands;

#[derive(Parser)]
#[command(
    name = "toolflow",
    about = "toolflow, tool-calling flow orchestration for LLM agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.toolflow/config.toml)
    #[arg(short, long, global = true, env = "TOOLFLOW_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Start the gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single query and print the events as they arrive
    Ask {
        /// The user input
        query: String,

        /// Tool filter strategy to apply
        #[arg(short, long)]
        strategy: Option<String>,

        /// Only expose tools carrying one of these tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// System message for this run
        #[arg(long)]
        system: Option<String>,

        /// Print raw event JSON, one per line
        #[arg(long)]
        json: bool,
    },

    /// List registered tools
    Tools,

    /// List tool and protocol filter strategies
    Strategies,
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
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::run(config_path, force)?,
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Ask {
            query,
            strategy,
            tags,
            system,
            json,
        } => {
            let options = commands::ask::AskOptions {
                strategy,
                tags,
                system,
                json,
            };
            commands::ask::run(config_path, query, options).await?
        }
        Commands::Tools => commands::tools::run(config_path)?,
        Commands::Strategies => commands::strategies::run(config_path)?,
    }

    Ok(())
}
